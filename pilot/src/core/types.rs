//! Shared deterministic types for the CI feedback loop.
//!
//! These types define stable contracts between the loop, the CI provider and
//! the agent harness. They do not depend on external state or I/O.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sentinel the agent is instructed to print after pushing a fix.
pub const PUSH_CONFIRMATION_TOKEN: &str = "FIXES_PUSHED";

/// Raw status reported by a CI provider for one poll.
///
/// Provider-specific strings are normalized with [`BuildStatus::parse`]; any
/// string we do not recognize is kept verbatim in `Unknown`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Success,
    Failed,
    Error,
    Canceled,
    Unauthorized,
    Running,
    OnHold,
    NotFound,
    Unknown(String),
}

impl BuildStatus {
    /// Normalize a provider status string (pipeline state or workflow status).
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "success" => Self::Success,
            "failed" => Self::Failed,
            "error" => Self::Error,
            "canceled" | "cancelled" => Self::Canceled,
            "unauthorized" => Self::Unauthorized,
            // `failing` means a job failed while others still run.
            "running" | "pending" | "failing" => Self::Running,
            "on_hold" => Self::OnHold,
            "not_found" => Self::NotFound,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Error => "error",
            Self::Canceled => "canceled",
            Self::Unauthorized => "unauthorized",
            Self::Running => "running",
            Self::OnHold => "on_hold",
            Self::NotFound => "not_found",
            Self::Unknown(raw) => raw,
        }
    }

    /// Classify this poll for the loop: done (success or failed) or keep waiting.
    pub fn outcome(&self) -> BuildOutcome {
        match self {
            Self::Success => BuildOutcome::Success,
            Self::Failed | Self::Error | Self::Canceled | Self::Unauthorized => {
                BuildOutcome::Failed
            }
            Self::Running | Self::OnHold | Self::NotFound | Self::Unknown(_) => {
                BuildOutcome::Pending
            }
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the loop does with a single poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Build is green; the loop is resolved.
    Success,
    /// Build concluded with a failure-family status.
    Failed,
    /// Not concluded yet (running, not found, unknown). Keep polling.
    Pending,
}

/// Failure diagnostics captured for one fix attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    pub raw_text: String,
    /// 1-based attempt number this report feeds.
    pub source_attempt: u32,
}

/// Agent output for a fix request.
///
/// `push_confirmed` is the only acknowledgement channel from the agent: it is
/// true when the output contains [`PUSH_CONFIRMATION_TOKEN`] anywhere. The
/// agent's output format is not contractual, so both false negatives (agent
/// pushed but forgot the token) and false positives (agent quoted the
/// instruction back) are possible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentReply {
    pub output: String,
    pub push_confirmed: bool,
}

impl AgentReply {
    pub fn from_output(output: String) -> Self {
        let push_confirmed = output.contains(PUSH_CONFIRMATION_TOKEN);
        Self {
            output,
            push_confirmed,
        }
    }
}

/// Pull request the loop is driving, with the head branch CI builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub number: String,
    pub head_branch: String,
}

/// `owner/name` of the hosted repository.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RepoSlug {
    pub owner: String,
    pub name: String,
}

impl fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}
