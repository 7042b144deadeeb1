//! Workflow configuration stored under `.pilot/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Workflow configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// the values the workflow was designed around. Loaded once per process and
/// passed down by reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PilotConfig {
    pub objective_repository: ObjectiveConfig,
    pub ci: CiConfig,
    pub agent_harness: AgentConfig,
    pub repo: RepoConfig,
    pub prompts: PromptOverrides,
}

/// Where objectives (issues) are fetched from.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveSource {
    #[default]
    GithubIssues,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ObjectiveConfig {
    pub source: ObjectiveSource,
}

/// Which CI backend to poll.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CiSource {
    #[default]
    CircleCi,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CiConfig {
    pub source: CiSource,
    /// Fix attempts before giving up on a red build.
    pub max_retries: u32,
    /// Seconds between CI status polls.
    pub poll_interval_secs: u64,
    /// Ceiling on how long to wait for one build to conclude.
    pub max_wait_secs: u64,
    /// Pause after the agent pushes a fix so CI can pick up the commit.
    pub cooldown_secs: u64,
}

impl Default for CiConfig {
    fn default() -> Self {
        Self {
            source: CiSource::default(),
            max_retries: 10,
            poll_interval_secs: 30,
            max_wait_secs: 3600,
            cooldown_secs: 60,
        }
    }
}

impl CiConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Which coding agent CLI to drive.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentSource {
    #[default]
    ClaudeCode,
    Opencode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    pub source: AgentSource,
    /// Extra `--flag`s passed to the agent CLI (without the leading dashes).
    pub flags: Vec<String>,
    /// Kill the agent if a single invocation runs longer than this.
    pub timeout_secs: u64,
    /// Bytes of agent stdout/stderr kept in memory.
    pub output_limit_bytes: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            source: AgentSource::default(),
            flags: vec!["dangerously-skip-permissions".to_string()],
            timeout_secs: 60 * 60,
            output_limit_bytes: 2_000_000,
        }
    }
}

impl AgentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RepoConfig {
    /// Template for the issue branch; `{{ identifier }}` is the issue id.
    pub branch_name: String,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            branch_name: "issue-{{ identifier }}".to_string(),
        }
    }
}

/// Optional replacements for the built-in prompt templates.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PromptOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execute_with_plan: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execute_without_plan: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix_ci: Option<String>,
}

impl PilotConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ci.max_retries == 0 {
            return Err(anyhow!("ci.max_retries must be > 0"));
        }
        if self.ci.poll_interval_secs == 0 {
            return Err(anyhow!("ci.poll_interval_secs must be > 0"));
        }
        if self.ci.max_wait_secs == 0 {
            return Err(anyhow!("ci.max_wait_secs must be > 0"));
        }
        if self.agent_harness.timeout_secs == 0 {
            return Err(anyhow!("agent_harness.timeout_secs must be > 0"));
        }
        if self.agent_harness.output_limit_bytes == 0 {
            return Err(anyhow!("agent_harness.output_limit_bytes must be > 0"));
        }
        if !self.repo.branch_name.contains("identifier") {
            return Err(anyhow!(
                "repo.branch_name must reference {{{{ identifier }}}} (got '{}')",
                self.repo.branch_name
            ));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PilotConfig::default()`.
pub fn load_config(path: &Path) -> Result<PilotConfig> {
    if !path.exists() {
        warn!(path = %path.display(), "config file not found, using defaults");
        let cfg = PilotConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PilotConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PilotConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
