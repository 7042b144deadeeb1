//! `pilot execute`: implement an objective in its worktree, then watch CI.

use anyhow::Result;
use tracing::instrument;

use crate::ci_loop::{CiLoopOutcome, FatalReason};
use crate::console;
use crate::core::pr_number::PrMatch;
use crate::io::agent::AgentHarness;
use crate::io::github::GhCli;
use crate::io::init::PilotPaths;
use crate::io::objective::objective_repository_from_config;
use crate::io::prompt::Prompts;
use crate::pr::resolve_pr_number;
use crate::workspace::Workspace;

#[instrument(skip_all, fields(identifier))]
pub fn execute(
    ws: &Workspace,
    identifier: &str,
    max_retries: Option<u32>,
) -> Result<CiLoopOutcome> {
    let branch_name = ws.branch_name(identifier)?;
    let worktree = ws.enter_worktree(&branch_name, true)?;
    let worktree_paths = PilotPaths::new(&worktree);
    let prompts = Prompts::new(&ws.config.prompts)?;

    let plan_file = worktree_paths.plan_file(identifier);
    let instructions = if plan_file.is_file() {
        console::info(format!("Executing plan {}", plan_file.display()));
        prompts.execute_with_plan(identifier, &plan_file, &branch_name)?
    } else {
        console::info("No plan found, working directly from the objective");
        let objective_file =
            objective_repository_from_config(&ws.config.objective_repository, &worktree_paths)
                .download(identifier)?;
        prompts.execute_without_plan(identifier, &objective_file, &branch_name)?
    };

    let output = ws.agent(&worktree).invoke(&instructions);
    console::block("Agent output:", &output);

    let found = resolve_pr_number(&output, &branch_name, &GhCli::new(&worktree))?;
    match pr_for_loop(found, &branch_name) {
        Ok(pr_number) => ws.run_ci_loop(
            &worktree,
            identifier,
            &branch_name,
            Some(pr_number),
            max_retries,
        ),
        Err(reason) => Ok(CiLoopOutcome::Fatal(reason)),
    }
}

/// The PR the loop should drive. Every lookup strategy, including the
/// code host, has already run by now.
fn pr_for_loop(found: Option<PrMatch>, branch_name: &str) -> Result<String, FatalReason> {
    match found {
        Some(found) => {
            console::success(format!(
                "Found PR #{} ({})",
                found.number,
                found.strategy.describe()
            ));
            Ok(found.number)
        }
        None => {
            console::error("Could not determine the PR number from the agent output");
            Err(FatalReason::NoPrFound {
                branch: branch_name.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pr_number::Strategy;

    #[test]
    fn resolved_pr_is_passed_through() {
        let found = PrMatch {
            number: "774".to_string(),
            strategy: Strategy::BranchLookup,
        };
        assert_eq!(pr_for_loop(Some(found), "issue-7"), Ok("774".to_string()));
    }

    #[test]
    fn unresolved_pr_stops_without_another_lookup() {
        assert_eq!(
            pr_for_loop(None, "issue-7"),
            Err(FatalReason::NoPrFound {
                branch: "issue-7".to_string()
            })
        );
    }
}
