//! Objective (issue) repositories.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::io::config::{ObjectiveConfig, ObjectiveSource};
use crate::io::github::GhCli;
use crate::io::init::PilotPaths;

/// Source of objectives, downloaded to a local markdown file for the agent.
pub trait ObjectiveRepository {
    /// Fetch the objective and write it to [`Self::local_path`], overwriting.
    fn download(&self, identifier: &str) -> Result<PathBuf>;
    fn local_path(&self, identifier: &str) -> PathBuf;
}

/// GitHub issues fetched with `gh issue view`.
#[derive(Debug, Clone)]
pub struct GithubIssues {
    gh: GhCli,
    paths: PilotPaths,
}

impl GithubIssues {
    pub fn new(gh: GhCli, paths: PilotPaths) -> Self {
        Self { gh, paths }
    }
}

impl ObjectiveRepository for GithubIssues {
    #[instrument(skip_all, fields(identifier))]
    fn download(&self, identifier: &str) -> Result<PathBuf> {
        let body = self
            .gh
            .issue_view(identifier)
            .with_context(|| format!("download GitHub issue #{identifier}"))?;
        let path = self.local_path(identifier);
        fs::create_dir_all(&self.paths.objectives_dir).with_context(|| {
            format!("create directory {}", self.paths.objectives_dir.display())
        })?;
        fs::write(&path, body).with_context(|| format!("write {}", path.display()))?;
        debug!(path = %path.display(), "objective downloaded");
        Ok(path)
    }

    fn local_path(&self, identifier: &str) -> PathBuf {
        self.paths.objective_file(identifier)
    }
}

/// Repository named by `[objective_repository] source`.
pub fn objective_repository_from_config(
    config: &ObjectiveConfig,
    paths: &PilotPaths,
) -> Box<dyn ObjectiveRepository> {
    match config.source {
        ObjectiveSource::GithubIssues => Box::new(GithubIssues::new(
            GhCli::new(&paths.root),
            paths.clone(),
        )),
    }
}
