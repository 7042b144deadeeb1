//! Agent harness abstraction.
//!
//! The [`AgentHarness`] trait decouples the workflow from the coding agent
//! CLI (`claude` or `opencode`). Tests use scripted harnesses that return
//! canned replies without spawning processes.

use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, instrument, warn};

use crate::io::config::{AgentConfig, AgentSource};
use crate::io::process::{RunOptions, run_command};

/// Sends natural-language instructions to a coding agent.
pub trait AgentHarness {
    /// Run the agent to completion and return its stdout.
    ///
    /// Never fails: spawn errors, timeouts and non-zero exits are logged and
    /// whatever text was captured (possibly empty) is returned.
    fn invoke(&self, instructions: &str) -> String;
}

/// [`AgentHarness`] that shells out to an agent CLI inside a workdir.
#[derive(Debug)]
pub struct AgentCli {
    source: AgentSource,
    workdir: PathBuf,
    flags: Vec<String>,
    options: RunOptions,
    logs_dir: Option<PathBuf>,
    invocations: AtomicU32,
}

impl AgentCli {
    /// Harness for `[agent_harness] source`, running in `workdir`.
    pub fn from_config(config: &AgentConfig, workdir: impl Into<PathBuf>) -> Self {
        Self {
            source: config.source,
            workdir: workdir.into(),
            flags: config.flags.clone(),
            options: RunOptions::new(config.timeout(), config.output_limit_bytes),
            logs_dir: None,
            invocations: AtomicU32::new(0),
        }
    }

    /// Persist one transcript per invocation under `dir`.
    pub fn with_transcripts(mut self, dir: impl Into<PathBuf>) -> Self {
        self.logs_dir = Some(dir.into());
        self
    }

    fn program(&self) -> &'static str {
        match self.source {
            AgentSource::ClaudeCode => "claude",
            AgentSource::Opencode => "opencode",
        }
    }

    fn command(&self, instructions: &str) -> Command {
        let mut cmd = Command::new(self.program());
        cmd.args(agent_args(self.source, instructions, &self.flags))
            .current_dir(&self.workdir);
        cmd
    }

    fn transcript_path(&self) -> Option<PathBuf> {
        let dir = self.logs_dir.as_ref()?;
        let seq = self.invocations.fetch_add(1, Ordering::Relaxed) + 1;
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Some(dir.join(format!("{}-{stamp}-{seq:03}.log", self.program())))
    }
}

impl AgentHarness for AgentCli {
    #[instrument(skip_all, fields(agent = self.program(), bytes = instructions.len()))]
    fn invoke(&self, instructions: &str) -> String {
        info!(workdir = %self.workdir.display(), "invoking agent");
        let mut options = self.options.clone();
        if let Some(path) = self.transcript_path() {
            options = options.with_transcript(path);
        }

        let output = match run_command(self.command(instructions), None, &options) {
            Ok(output) => output,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "agent could not be run");
                return String::new();
            }
        };
        if output.timed_out {
            warn!(
                timeout_secs = options.timeout.as_secs(),
                "agent timed out, using partial output"
            );
        } else if !output.status.success() {
            warn!(
                exit_code = ?output.status.code(),
                stderr = %output.stderr_text().trim(),
                "agent exited unsuccessfully"
            );
        }
        debug!(stdout_bytes = output.stdout.len(), "agent finished");
        output.stdout_text()
    }
}

/// Arguments for one non-interactive agent run.
fn agent_args(source: AgentSource, instructions: &str, flags: &[String]) -> Vec<String> {
    match source {
        AgentSource::ClaudeCode => {
            let mut args = vec!["-p".to_string(), instructions.to_string()];
            args.extend(flags.iter().map(|flag| format!("--{flag}")));
            args
        }
        AgentSource::Opencode => vec!["run".to_string(), instructions.to_string()],
    }
}
