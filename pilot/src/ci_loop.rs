//! CI feedback loop: wait for the build, hand failures to the agent, repeat.
//!
//! One loop drives one pull request. Each failed build costs one fix attempt;
//! the loop stops when CI is green, when `max_retries` fix attempts have been
//! spent and the build is still red, or on a fatal condition (wrong branch,
//! no PR, CI never concluding, agent not confirming a push).

use std::time::Duration;

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::console;
use crate::core::budget::WaitBudget;
use crate::core::types::{AgentReply, BuildOutcome, BuildStatus, FailureReport, PullRequest};
use crate::io::agent::AgentHarness;
use crate::io::ci::CiProvider;
use crate::io::config::CiConfig;
use crate::io::failure_log::write_failure_report;
use crate::io::git::VersionControl;
use crate::io::github::CodeHost;
use crate::io::init::PilotPaths;
use crate::io::prompt::Prompts;
use crate::io::sleep::Sleeper;

/// Failure text used when CI diagnostics cannot be retrieved.
pub const FAILURE_DETAILS_PLACEHOLDER: &str = "Could not fetch failure details";

/// Timing and retry limits for one loop run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    pub max_retries: u32,
    pub poll_interval: Duration,
    pub max_wait: Duration,
    pub cooldown: Duration,
}

impl LoopSettings {
    pub fn from_config(config: &CiConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            poll_interval: config.poll_interval(),
            max_wait: config.max_wait(),
            cooldown: config.cooldown(),
        }
    }

    pub fn with_max_retries(mut self, max_retries: Option<u32>) -> Self {
        if let Some(max_retries) = max_retries {
            self.max_retries = max_retries;
        }
        self
    }
}

/// Mutable state of one loop run.
///
/// `attempt` counts fix attempts started so far and never exceeds
/// `max_retries`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySession {
    pub issue_identifier: String,
    pub pr_number: String,
    pub branch_name: String,
    attempt: u32,
    max_retries: u32,
}

impl RetrySession {
    pub fn new(
        issue_identifier: impl Into<String>,
        pr_number: impl Into<String>,
        branch_name: impl Into<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            issue_identifier: issue_identifier.into(),
            pr_number: pr_number.into(),
            branch_name: branch_name.into(),
            attempt: 0,
            max_retries,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_retries
    }

    /// Start the next fix attempt and return its 1-based number.
    ///
    /// Returns `None` once `max_retries` attempts have been started.
    pub fn begin_attempt(&mut self) -> Option<u32> {
        if self.is_exhausted() {
            return None;
        }
        self.attempt += 1;
        Some(self.attempt)
    }
}

/// Why a loop run stopped without resolving or exhausting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalReason {
    #[error("not on branch {expected} (current branch is {actual})")]
    BranchMismatch { expected: String, actual: String },
    #[error("no open pull request found for branch {branch}")]
    NoPrFound { branch: String },
    #[error("timed out after {}s waiting for the CI build to conclude", waited.as_secs())]
    Timeout { waited: Duration },
    #[error("could not confirm that fixes were pushed (attempt {attempt})")]
    PushUnconfirmed { attempt: u32 },
}

/// Terminal state of a loop run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CiLoopOutcome {
    /// CI is green.
    Resolved { fix_attempts: u32 },
    /// CI still red after `max_retries` fix attempts.
    Exhausted { fix_attempts: u32 },
    Fatal(FatalReason),
}

/// Result of waiting for one build.
#[derive(Debug, Clone, PartialEq, Eq)]
enum WaitResult {
    Concluded(BuildOutcome),
    TimedOut(Duration),
}

/// Collaborators for one loop run.
pub struct CiLoop<'a, 'p> {
    pub vcs: &'a dyn VersionControl,
    pub host: &'a dyn CodeHost,
    pub ci: &'a dyn CiProvider,
    pub agent: &'a dyn AgentHarness,
    pub sleeper: &'a dyn Sleeper,
    pub prompts: &'a Prompts<'p>,
    /// Paths of the worktree the loop runs in.
    pub paths: &'a PilotPaths,
    pub settings: LoopSettings,
}

impl CiLoop<'_, '_> {
    /// Drive the PR for `branch_name` until CI is green or the loop gives up.
    ///
    /// Errors are reserved for infrastructure failures (git/gh unavailable,
    /// unwritable artifact, broken prompt template).
    #[instrument(skip_all, fields(issue = issue_identifier, branch = branch_name))]
    pub fn run(
        &self,
        issue_identifier: &str,
        branch_name: &str,
        pr_number: Option<String>,
    ) -> Result<CiLoopOutcome> {
        let current = self.vcs.current_branch()?;
        if current != branch_name {
            return Ok(CiLoopOutcome::Fatal(FatalReason::BranchMismatch {
                expected: branch_name.to_string(),
                actual: current,
            }));
        }

        let pr_number = match pr_number {
            Some(number) => number,
            None => match self.host.find_open_pr_for_branch(branch_name)? {
                Some(number) => number,
                None => {
                    return Ok(CiLoopOutcome::Fatal(FatalReason::NoPrFound {
                        branch: branch_name.to_string(),
                    }));
                }
            },
        };
        let pr = PullRequest {
            head_branch: self.host.pr_head_branch(&pr_number)?,
            number: pr_number,
        };
        debug!(pr = %pr.number, head = %pr.head_branch, "driving pull request");

        let plan_file = self.paths.plan_file(issue_identifier);
        let mut session = RetrySession::new(
            issue_identifier,
            pr.number.clone(),
            branch_name,
            self.settings.max_retries,
        );

        loop {
            console::info(format!(
                "Iteration {}/{}",
                session.attempt() + 1,
                session.max_retries()
            ));

            match self.wait_for_build(&pr) {
                WaitResult::TimedOut(waited) => {
                    console::error("Timeout waiting for the CI build to complete");
                    return Ok(CiLoopOutcome::Fatal(FatalReason::Timeout { waited }));
                }
                WaitResult::Concluded(BuildOutcome::Success) => {
                    console::success(format!(
                        "CI build passed! Issue #{issue_identifier} has been successfully solved."
                    ));
                    return Ok(CiLoopOutcome::Resolved {
                        fix_attempts: session.attempt(),
                    });
                }
                WaitResult::Concluded(_) => {}
            }

            console::warning("Build failed. Analyzing failures...");
            let details = match self.ci.build_failures(&pr) {
                Ok(details) => details,
                Err(err) => {
                    warn!(err = %format!("{err:#}"), "could not fetch failure details");
                    FAILURE_DETAILS_PLACEHOLDER.to_string()
                }
            };
            console::block("Failure details:", &details);

            let Some(attempt) = session.begin_attempt() else {
                console::error(format!(
                    "Maximum retry count ({}) reached. Please fix the issues manually.",
                    session.max_retries()
                ));
                return Ok(CiLoopOutcome::Exhausted {
                    fix_attempts: session.attempt(),
                });
            };

            let report = FailureReport {
                raw_text: details,
                source_attempt: attempt,
            };
            let failure_file = write_failure_report(self.paths, branch_name, &report)?;
            let instructions =
                self.prompts
                    .fix_ci(&pr.number, &failure_file, &plan_file, branch_name)?;

            console::info(format!(
                "Attempting to fix the issues (attempt {attempt}/{})...",
                session.max_retries()
            ));
            let reply = AgentReply::from_output(self.agent.invoke(&instructions));
            console::block("Agent output:", &reply.output);

            if !reply.push_confirmed {
                console::error("Could not confirm that fixes were pushed. Please check manually.");
                return Ok(CiLoopOutcome::Fatal(FatalReason::PushUnconfirmed {
                    attempt,
                }));
            }
            console::success("Fixes have been pushed. Waiting before checking build status again...");
            self.sleeper.sleep(self.settings.cooldown);
        }
    }

    /// Poll until the build concludes or the wait budget runs out.
    ///
    /// Polls happen at elapsed 0, interval, 2*interval, ... while elapsed is
    /// below `max_wait`. Provider errors count as an unknown status.
    fn wait_for_build(&self, pr: &PullRequest) -> WaitResult {
        console::info("Waiting for the CI build to complete...");
        let mut budget = WaitBudget::new(self.settings.poll_interval, self.settings.max_wait);
        let mut last: Option<BuildStatus> = None;
        let mut dots = false;

        while budget.has_remaining() {
            let status = match self.ci.build_status(pr) {
                Ok(status) => status,
                Err(err) => {
                    warn!(err = %format!("{err:#}"), "CI status poll failed");
                    BuildStatus::Unknown("poll error".to_string())
                }
            };

            if last.as_ref() == Some(&status) {
                console::progress_dot();
                dots = true;
            } else {
                if dots {
                    println!();
                    dots = false;
                }
                report_status(&status, budget.elapsed());
            }

            let outcome = status.outcome();
            if outcome != BuildOutcome::Pending {
                if dots {
                    println!();
                }
                info!(%status, elapsed_secs = budget.elapsed().as_secs(), "build concluded");
                return WaitResult::Concluded(outcome);
            }

            last = Some(status);
            self.sleeper.sleep(budget.interval());
            budget.advance();
        }

        if dots {
            println!();
        }
        WaitResult::TimedOut(budget.elapsed())
    }
}

fn report_status(status: &BuildStatus, elapsed: Duration) {
    match status {
        BuildStatus::Success => console::success("CI build passed!"),
        BuildStatus::Failed
        | BuildStatus::Error
        | BuildStatus::Canceled
        | BuildStatus::Unauthorized => {
            console::warning(format!("CI build failed with status: {status}"));
        }
        BuildStatus::Running | BuildStatus::OnHold => console::info(format!(
            "Build still running... (elapsed: {}s)",
            elapsed.as_secs()
        )),
        BuildStatus::NotFound => console::warning("Build not found yet, waiting..."),
        BuildStatus::Unknown(raw) => {
            console::warning(format!("Unknown build status: {raw}, waiting..."));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::PUSH_CONFIRMATION_TOKEN;
    use crate::io::config::PromptOverrides;
    use crate::test_support::{
        FakeCodeHost, FakeVcs, RecordingSleeper, ScriptedAgent, ScriptedCi,
    };
    use std::cell::RefCell;
    use std::path::PathBuf;

    const CONFIRMED: &str = "pushed the fix\nFIXES_PUSHED\n";

    fn settings() -> LoopSettings {
        LoopSettings::from_config(&CiConfig::default())
    }

    struct Harness {
        _temp: tempfile::TempDir,
        paths: PilotPaths,
        overrides: PromptOverrides,
        vcs: FakeVcs,
        host: FakeCodeHost,
        sleeper: RecordingSleeper,
    }

    impl Harness {
        fn new() -> Self {
            let temp = tempfile::tempdir().expect("tempdir");
            let paths = PilotPaths::new(temp.path());
            Self {
                _temp: temp,
                paths,
                overrides: PromptOverrides::default(),
                vcs: FakeVcs::on_branch("issue-7"),
                host: FakeCodeHost::with_open_pr("12", "issue-7"),
                sleeper: RecordingSleeper::default(),
            }
        }

        fn run(
            &self,
            ci: &dyn CiProvider,
            agent: &dyn AgentHarness,
            settings: LoopSettings,
            pr_number: Option<String>,
        ) -> CiLoopOutcome {
            let prompts = Prompts::new(&self.overrides).expect("prompts");
            CiLoop {
                vcs: &self.vcs,
                host: &self.host,
                ci,
                agent,
                sleeper: &self.sleeper,
                prompts: &prompts,
                paths: &self.paths,
                settings,
            }
            .run("7", "issue-7", pr_number)
            .expect("loop")
        }
    }

    #[test]
    fn session_never_starts_more_than_max_retries_attempts() {
        let mut session = RetrySession::new("7", "12", "issue-7", 2);
        assert_eq!(session.begin_attempt(), Some(1));
        assert_eq!(session.begin_attempt(), Some(2));
        assert!(session.is_exhausted());
        assert_eq!(session.begin_attempt(), None);
        assert_eq!(session.attempt(), 2);
    }

    #[test]
    fn green_build_resolves_without_fixes() {
        let h = Harness::new();
        let ci = ScriptedCi::new(vec![BuildStatus::Success]);
        let agent = ScriptedAgent::always(CONFIRMED);

        let outcome = h.run(&ci, &agent, settings(), Some("12".to_string()));

        assert_eq!(outcome, CiLoopOutcome::Resolved { fix_attempts: 0 });
        assert_eq!(agent.invocations(), 0);
        assert!(h.sleeper.slept().is_empty());
    }

    #[test]
    fn two_failures_then_success_takes_two_fixes() {
        let h = Harness::new();
        let ci = ScriptedCi::new(vec![
            BuildStatus::Failed,
            BuildStatus::Failed,
            BuildStatus::Success,
        ]);
        let agent = ScriptedAgent::always(CONFIRMED);

        let outcome = h.run(&ci, &agent, settings(), Some("12".to_string()));

        assert_eq!(outcome, CiLoopOutcome::Resolved { fix_attempts: 2 });
        assert_eq!(agent.invocations(), 2);
        assert_eq!(ci.failure_calls(), 2);
        assert_eq!(
            h.sleeper.slept(),
            vec![Duration::from_secs(60), Duration::from_secs(60)]
        );
    }

    #[test]
    fn persistent_failure_exhausts_after_max_retries_fixes() {
        let h = Harness::new();
        let ci = ScriptedCi::new(vec![BuildStatus::Failed]);
        let agent = ScriptedAgent::always(CONFIRMED);

        let outcome = h.run(&ci, &agent, settings(), Some("12".to_string()));

        assert_eq!(outcome, CiLoopOutcome::Exhausted { fix_attempts: 10 });
        assert_eq!(agent.invocations(), 10);
        assert_eq!(ci.status_calls(), 11);
        assert!(h.paths.failure_details_file("issue-7", 10).is_file());
        assert!(!h.paths.failure_details_file("issue-7", 11).exists());
    }

    #[test]
    fn retry_override_bounds_fix_attempts() {
        let h = Harness::new();
        let ci = ScriptedCi::new(vec![BuildStatus::Error]);
        let agent = ScriptedAgent::always(CONFIRMED);

        let outcome = h.run(
            &ci,
            &agent,
            settings().with_max_retries(Some(3)),
            Some("12".to_string()),
        );

        assert_eq!(outcome, CiLoopOutcome::Exhausted { fix_attempts: 3 });
        assert_eq!(agent.invocations(), 3);
    }

    #[test]
    fn missing_confirmation_is_fatal_without_sleeping_or_repolling() {
        let h = Harness::new();
        let ci = ScriptedCi::new(vec![BuildStatus::Failed, BuildStatus::Success]);
        let agent = ScriptedAgent::always("I changed some files but did not push.");

        let outcome = h.run(&ci, &agent, settings(), Some("12".to_string()));

        assert_eq!(
            outcome,
            CiLoopOutcome::Fatal(FatalReason::PushUnconfirmed { attempt: 1 })
        );
        assert_eq!(ci.status_calls(), 1);
        assert!(h.sleeper.slept().is_empty());
    }

    #[test]
    fn build_never_found_times_out_after_120_polls() {
        let h = Harness::new();
        let ci = ScriptedCi::new(vec![BuildStatus::NotFound]);
        let agent = ScriptedAgent::always(CONFIRMED);

        let outcome = h.run(&ci, &agent, settings(), Some("12".to_string()));

        assert_eq!(
            outcome,
            CiLoopOutcome::Fatal(FatalReason::Timeout {
                waited: Duration::from_secs(3600)
            })
        );
        assert_eq!(ci.status_calls(), 120);
        assert_eq!(h.sleeper.slept().len(), 120);
        assert!(
            h.sleeper
                .slept()
                .iter()
                .all(|d| *d == Duration::from_secs(30))
        );
        assert_eq!(agent.invocations(), 0);
    }

    #[test]
    fn running_build_keeps_polling_until_it_concludes() {
        let h = Harness::new();
        let ci = ScriptedCi::new(vec![
            BuildStatus::NotFound,
            BuildStatus::Running,
            BuildStatus::Running,
            BuildStatus::OnHold,
            BuildStatus::Unknown("queued".to_string()),
            BuildStatus::Success,
        ]);
        let agent = ScriptedAgent::always(CONFIRMED);

        let outcome = h.run(&ci, &agent, settings(), Some("12".to_string()));

        assert_eq!(outcome, CiLoopOutcome::Resolved { fix_attempts: 0 });
        assert_eq!(ci.status_calls(), 6);
        assert_eq!(h.sleeper.slept().len(), 5);
    }

    #[test]
    fn branch_mismatch_makes_no_ci_calls() {
        let mut h = Harness::new();
        h.vcs = FakeVcs::on_branch("main");
        let ci = ScriptedCi::new(vec![BuildStatus::Success]);
        let agent = ScriptedAgent::always(CONFIRMED);

        let outcome = h.run(&ci, &agent, settings(), Some("12".to_string()));

        assert_eq!(
            outcome,
            CiLoopOutcome::Fatal(FatalReason::BranchMismatch {
                expected: "issue-7".to_string(),
                actual: "main".to_string(),
            })
        );
        assert_eq!(ci.status_calls(), 0);
        assert_eq!(h.host.pr_lookups(), 0);
    }

    #[test]
    fn pr_is_looked_up_by_branch_when_not_given() {
        let h = Harness::new();
        let ci = ScriptedCi::new(vec![BuildStatus::Success]);
        let agent = ScriptedAgent::always(CONFIRMED);

        let outcome = h.run(&ci, &agent, settings(), None);

        assert_eq!(outcome, CiLoopOutcome::Resolved { fix_attempts: 0 });
        assert_eq!(h.host.pr_lookups(), 1);
        assert_eq!(ci.polled_prs(), vec!["12".to_string()]);
    }

    #[test]
    fn no_pr_for_branch_is_fatal() {
        let mut h = Harness::new();
        h.host = FakeCodeHost::without_pr();
        let ci = ScriptedCi::new(vec![BuildStatus::Success]);
        let agent = ScriptedAgent::always(CONFIRMED);

        let outcome = h.run(&ci, &agent, settings(), None);

        assert_eq!(
            outcome,
            CiLoopOutcome::Fatal(FatalReason::NoPrFound {
                branch: "issue-7".to_string()
            })
        );
        assert_eq!(ci.status_calls(), 0);
    }

    #[test]
    fn unreadable_failure_details_use_placeholder() {
        let h = Harness::new();
        let ci = ScriptedCi::new(vec![BuildStatus::Failed, BuildStatus::Success])
            .failing_details();
        let agent = ScriptedAgent::always(CONFIRMED);

        let outcome = h.run(&ci, &agent, settings(), Some("12".to_string()));

        assert_eq!(outcome, CiLoopOutcome::Resolved { fix_attempts: 1 });
        let artifact = h.paths.failure_details_file("issue-7", 1);
        assert_eq!(
            std::fs::read_to_string(artifact).expect("artifact"),
            FAILURE_DETAILS_PLACEHOLDER
        );
    }

    /// Agent that checks the artifact named in its instructions already exists.
    struct ArtifactCheckingAgent {
        expected: PathBuf,
        seen: RefCell<Vec<(bool, bool)>>,
    }

    impl AgentHarness for ArtifactCheckingAgent {
        fn invoke(&self, instructions: &str) -> String {
            let mentioned = instructions.contains(&self.expected.display().to_string());
            self.seen
                .borrow_mut()
                .push((mentioned, self.expected.is_file()));
            PUSH_CONFIRMATION_TOKEN.to_string()
        }
    }

    #[test]
    fn artifact_is_written_before_agent_is_asked_to_read_it() {
        let h = Harness::new();
        let ci = ScriptedCi::new(vec![BuildStatus::Failed, BuildStatus::Success])
            .with_details("Job: test (#3) failed.");
        let agent = ArtifactCheckingAgent {
            expected: h.paths.failure_details_file("issue-7", 1),
            seen: RefCell::new(Vec::new()),
        };

        let outcome = h.run(&ci, &agent, settings(), Some("12".to_string()));

        assert_eq!(outcome, CiLoopOutcome::Resolved { fix_attempts: 1 });
        assert_eq!(*agent.seen.borrow(), vec![(true, true)]);
    }

    #[test]
    fn fix_instructions_reference_plan_pr_and_branch() {
        let h = Harness::new();
        let ci = ScriptedCi::new(vec![BuildStatus::Failed, BuildStatus::Success]);
        let agent = ScriptedAgent::always(CONFIRMED);

        h.run(&ci, &agent, settings(), Some("12".to_string()));

        let prompts = agent.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("PR #12"));
        assert!(prompts[0].contains(&h.paths.plan_file("7").display().to_string()));
        assert!(prompts[0].contains("`issue-7`"));
    }
}
