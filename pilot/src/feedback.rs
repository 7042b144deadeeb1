//! `pilot feedback`: apply reviewer feedback to an open PR, then watch CI.

use std::io::BufRead;
use std::path::Path;
use std::time::Duration;

use anyhow::{Result, bail};
use tracing::{debug, instrument};

use crate::ci_loop::{CiLoopOutcome, FatalReason};
use crate::console;
use crate::core::types::AgentReply;
use crate::io::agent::AgentHarness;
use crate::io::github::{CodeHost, GhCli};
use crate::io::init::PilotPaths;
use crate::io::prompt::Prompts;
use crate::io::sleep::{Sleeper, ThreadSleeper};
use crate::workspace::Workspace;

/// One round of feedback handed to the agent.
pub struct FeedbackStep<'a, 'p> {
    pub agent: &'a dyn AgentHarness,
    pub sleeper: &'a dyn Sleeper,
    pub prompts: &'a Prompts<'p>,
    /// Pause after a confirmed push so CI can pick up the new commit.
    pub cooldown: Duration,
}

impl FeedbackStep<'_, '_> {
    /// Ask the agent to apply `changes`. Sleeps the cooldown only when the
    /// agent confirmed a push.
    pub fn apply(&self, plan_file: &Path, branch_name: &str, changes: &str) -> Result<AgentReply> {
        let instructions = self.prompts.feedback(plan_file, branch_name, changes)?;
        console::info("Applying feedback...");
        let reply = AgentReply::from_output(self.agent.invoke(&instructions));
        console::block("Agent output:", &reply.output);

        if reply.push_confirmed {
            console::info(format!(
                "Waiting {}s for CI to pick up the changes...",
                self.cooldown.as_secs()
            ));
            self.sleeper.sleep(self.cooldown);
        }
        Ok(reply)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackOptions {
    pub identifier: String,
    /// Feedback text; read from stdin when absent.
    pub message: Option<String>,
    pub max_retries: Option<u32>,
}

#[instrument(skip_all, fields(identifier = %opts.identifier))]
pub fn feedback(
    ws: &Workspace,
    opts: &FeedbackOptions,
    input: &mut impl BufRead,
) -> Result<CiLoopOutcome> {
    let branch_name = ws.branch_name(&opts.identifier)?;
    let worktree = ws.enter_worktree(&branch_name, false)?;

    if !GhCli::new(&worktree).is_pr_open(&branch_name)? {
        bail!("no open pull request for branch {branch_name}");
    }

    let changes = match &opts.message {
        Some(message) => message.clone(),
        None => {
            console::info("Describe the requested changes (finish with an empty line):");
            console::read_multiline(input)?
        }
    };
    if changes.trim().is_empty() {
        bail!("no feedback given");
    }
    debug!(chars = changes.len(), "feedback collected");

    let prompts = Prompts::new(&ws.config.prompts)?;
    let agent = ws.agent(&worktree);
    let step = FeedbackStep {
        agent: &agent,
        sleeper: &ThreadSleeper,
        prompts: &prompts,
        cooldown: ws.config.ci.cooldown(),
    };
    let plan_file = PilotPaths::new(&worktree).plan_file(&opts.identifier);
    let reply = step.apply(&plan_file, &branch_name, &changes)?;
    if !reply.push_confirmed {
        console::error("Could not confirm that the feedback was pushed. Please check manually.");
        return Ok(CiLoopOutcome::Fatal(FatalReason::PushUnconfirmed {
            attempt: 0,
        }));
    }

    ws.run_ci_loop(
        &worktree,
        &opts.identifier,
        &branch_name,
        None,
        opts.max_retries,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::PromptOverrides;
    use crate::test_support::{RecordingSleeper, ScriptedAgent};

    fn run_step(agent: &ScriptedAgent, sleeper: &RecordingSleeper) -> AgentReply {
        let overrides = PromptOverrides::default();
        let prompts = Prompts::new(&overrides).expect("prompts");
        let step = FeedbackStep {
            agent,
            sleeper,
            prompts: &prompts,
            cooldown: Duration::from_secs(60),
        };
        step.apply(
            Path::new(".pilot/plans/plan_7.md"),
            "issue-7",
            "Rename the helper to parse_widget",
        )
        .expect("apply")
    }

    #[test]
    fn confirmed_push_waits_for_cooldown() {
        let agent = ScriptedAgent::always("Renamed. FIXES_PUSHED");
        let sleeper = RecordingSleeper::default();

        let reply = run_step(&agent, &sleeper);

        assert!(reply.push_confirmed);
        assert_eq!(sleeper.slept(), vec![Duration::from_secs(60)]);
        let prompt = &agent.prompts()[0];
        assert!(prompt.contains("Rename the helper to parse_widget"));
        assert!(prompt.contains("issue-7"));
    }

    #[test]
    fn unconfirmed_push_skips_cooldown() {
        let agent = ScriptedAgent::always("I could not push.");
        let sleeper = RecordingSleeper::default();

        let reply = run_step(&agent, &sleeper);

        assert!(!reply.push_confirmed);
        assert!(sleeper.slept().is_empty());
        assert_eq!(agent.invocations(), 1);
    }
}
