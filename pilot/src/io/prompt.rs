//! Agent instructions rendered from markdown templates.
//!
//! Built-in templates live in `prompts/`. `[prompts]` in the config may
//! replace any of them except `plan`. Rendering is strict: a template that
//! references a variable the workflow does not provide is an error.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use minijinja::{Environment, UndefinedBehavior, context};

use crate::core::types::PUSH_CONFIRMATION_TOKEN;
use crate::io::config::PromptOverrides;

const PLAN_TEMPLATE: &str = include_str!("prompts/plan.md");
const EXECUTE_WITH_PLAN_TEMPLATE: &str = include_str!("prompts/execute_with_plan.md");
const EXECUTE_WITHOUT_PLAN_TEMPLATE: &str = include_str!("prompts/execute_without_plan.md");
const FIX_CI_TEMPLATE: &str = include_str!("prompts/fix_ci.md");
const FEEDBACK_TEMPLATE: &str = include_str!("prompts/feedback.md");

/// Template engine wrapper around minijinja.
pub struct Prompts<'a> {
    env: Environment<'a>,
}

impl<'a> Prompts<'a> {
    /// Built-in templates, with config overrides applied.
    pub fn new(overrides: &'a PromptOverrides) -> Result<Self> {
        let mut env = strict_env();
        let templates = [
            ("plan", PLAN_TEMPLATE, None),
            (
                "execute_with_plan",
                EXECUTE_WITH_PLAN_TEMPLATE,
                overrides.execute_with_plan.as_deref(),
            ),
            (
                "execute_without_plan",
                EXECUTE_WITHOUT_PLAN_TEMPLATE,
                overrides.execute_without_plan.as_deref(),
            ),
            ("fix_ci", FIX_CI_TEMPLATE, overrides.fix_ci.as_deref()),
            ("feedback", FEEDBACK_TEMPLATE, overrides.feedback.as_deref()),
        ];
        for (name, builtin, custom) in templates {
            env.add_template(name, custom.unwrap_or(builtin))
                .with_context(|| format!("invalid prompt template [prompts].{name}"))?;
        }
        Ok(Self { env })
    }

    pub fn plan(&self, identifier: &str, objective_file: &Path, plan_file: &Path) -> Result<String> {
        self.render(
            "plan",
            context! {
                identifier,
                objective_file => objective_file.display().to_string(),
                plan_file => plan_file.display().to_string(),
            },
        )
    }

    pub fn execute_with_plan(
        &self,
        identifier: &str,
        plan_file: &Path,
        branch_name: &str,
    ) -> Result<String> {
        self.render(
            "execute_with_plan",
            context! {
                identifier,
                plan_file => plan_file.display().to_string(),
                branch_name,
            },
        )
    }

    pub fn execute_without_plan(
        &self,
        identifier: &str,
        objective_file: &Path,
        branch_name: &str,
    ) -> Result<String> {
        self.render(
            "execute_without_plan",
            context! {
                identifier,
                objective_file => objective_file.display().to_string(),
                branch_name,
            },
        )
    }

    /// Instruction for one CI fix attempt; the failure file must already exist.
    pub fn fix_ci(
        &self,
        pr_number: &str,
        failure_file: &Path,
        plan_file: &Path,
        branch_name: &str,
    ) -> Result<String> {
        self.render(
            "fix_ci",
            context! {
                pr_number,
                failure_file => failure_file.display().to_string(),
                plan_file => plan_file.display().to_string(),
                branch_name,
                confirmation_token => PUSH_CONFIRMATION_TOKEN,
            },
        )
    }

    pub fn feedback(&self, plan_file: &Path, branch_name: &str, changes: &str) -> Result<String> {
        self.render(
            "feedback",
            context! {
                plan_file => plan_file.display().to_string(),
                branch_name,
                changes,
                confirmation_token => PUSH_CONFIRMATION_TOKEN,
            },
        )
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let template = self.env.get_template(name)?;
        template
            .render(ctx)
            .with_context(|| format!("render prompt template {name}"))
    }
}

/// Branch name for an issue from the `[repo] branch_name` template.
pub fn render_branch_name(template: &str, identifier: &str) -> Result<String> {
    let env = strict_env();
    let name = env
        .render_str(template, context! { identifier })
        .with_context(|| format!("render branch name template '{template}'"))?;
    let name = name.trim();
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(anyhow!(
            "branch name template '{template}' produced an invalid branch name '{name}'"
        ));
    }
    Ok(name.to_string())
}

fn strict_env<'a>() -> Environment<'a> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn fix_ci_mentions_artifact_plan_branch_and_token() {
        let overrides = PromptOverrides::default();
        let prompts = Prompts::new(&overrides).expect("prompts");
        let text = prompts
            .fix_ci(
                "774",
                &PathBuf::from("/repo/.pilot/tmp/issue-7_failure_details_1.txt"),
                &PathBuf::from("/repo/.pilot/plans/plan_7.md"),
                "issue-7",
            )
            .expect("render");
        assert!(text.contains("PR #774"));
        assert!(text.contains("/repo/.pilot/tmp/issue-7_failure_details_1.txt"));
        assert!(text.contains("/repo/.pilot/plans/plan_7.md"));
        assert!(text.contains("`issue-7`"));
        assert!(text.contains(PUSH_CONFIRMATION_TOKEN));
    }

    #[test]
    fn plan_prompt_names_objective_and_plan_file() {
        let overrides = PromptOverrides::default();
        let prompts = Prompts::new(&overrides).expect("prompts");
        let text = prompts
            .plan(
                "42",
                Path::new(".pilot/objectives/42.md"),
                Path::new(".pilot/plans/plan_42.md"),
            )
            .expect("render");
        assert!(text.contains("objective \"42\""));
        assert!(text.contains(".pilot/objectives/42.md"));
        assert!(text.contains(".pilot/plans/plan_42.md"));
    }

    #[test]
    fn override_replaces_builtin() {
        let overrides = PromptOverrides {
            feedback: Some("Apply: {{ changes }} on {{ branch_name }}".to_string()),
            ..PromptOverrides::default()
        };
        let prompts = Prompts::new(&overrides).expect("prompts");
        let text = prompts
            .feedback(Path::new("plan.md"), "issue-3", "rename foo")
            .expect("render");
        assert_eq!(text, "Apply: rename foo on issue-3");
    }

    #[test]
    fn override_with_unknown_variable_fails_to_render() {
        let overrides = PromptOverrides {
            execute_with_plan: Some("Do {{ ticket }}".to_string()),
            ..PromptOverrides::default()
        };
        let prompts = Prompts::new(&overrides).expect("prompts");
        let err = prompts
            .execute_with_plan("1", Path::new("plan.md"), "issue-1")
            .unwrap_err();
        assert!(format!("{err:#}").contains("execute_with_plan"));
    }

    #[test]
    fn malformed_override_is_rejected_up_front() {
        let overrides = PromptOverrides {
            fix_ci: Some("{% if %}".to_string()),
            ..PromptOverrides::default()
        };
        let err = Prompts::new(&overrides).err().expect("error");
        assert!(err.to_string().contains("[prompts].fix_ci"));
    }

    #[test]
    fn branch_name_template_renders_identifier() {
        assert_eq!(
            render_branch_name("issue-{{ identifier }}", "12").expect("render"),
            "issue-12"
        );
        assert_eq!(
            render_branch_name("feature/{{ identifier }}", "ABC-1").expect("render"),
            "feature/ABC-1"
        );
        assert!(render_branch_name("issue-{{ id }}", "12").is_err());
        assert!(render_branch_name("issue {{ identifier }}", "12").is_err());
    }
}
