//! CI status providers.
//!
//! The feedback loop only asks two questions of CI: what is the current
//! status of the PR's build, and what failed. Providers are selected from
//! `[ci] source` when the workflow starts.

pub mod circle;

use anyhow::Result;

use crate::core::types::{BuildStatus, PullRequest, RepoSlug};
use crate::io::config::{CiConfig, CiSource};
use crate::io::http::ReqwestHttp;

pub use circle::CircleCi;

/// Read-only view of a CI backend for one pull request.
pub trait CiProvider {
    /// Status of the most recent build on the PR's head branch.
    fn build_status(&self, pr: &PullRequest) -> Result<BuildStatus>;
    /// Human-readable failure diagnostics (job names, failed step, log tail).
    fn build_failures(&self, pr: &PullRequest) -> Result<String>;
}

/// Build the provider named by `[ci] source`.
///
/// Fails when the provider cannot be used at all (e.g. no API token), so the
/// error surfaces before the first poll.
pub fn provider_from_config(
    config: &CiConfig,
    repo: RepoSlug,
    api_token: Option<String>,
) -> Result<Box<dyn CiProvider>> {
    match config.source {
        CiSource::CircleCi => Ok(Box::new(CircleCi::new(
            ReqwestHttp::new()?,
            repo,
            api_token,
        )?)),
    }
}
