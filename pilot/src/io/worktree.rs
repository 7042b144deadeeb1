//! Worktree adapter backed by the `wt` worktree manager.

use std::path::PathBuf;
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::{debug, instrument};

/// One entry of `wt list --format=json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Worktree {
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Worktree lookup and creation keyed by branch.
pub trait WorktreeManager {
    /// Path of the worktree checked out on `branch`, if any.
    fn find(&self, branch: &str) -> Result<Option<PathBuf>>;
    /// Create a worktree (and branch) for `branch`, returning its path.
    fn create(&self, branch: &str) -> Result<PathBuf>;
}

/// Wrapper for `wt` subprocess calls issued from a working directory.
#[derive(Debug, Clone)]
pub struct Wt {
    workdir: PathBuf,
}

impl Wt {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn list(&self) -> Result<Vec<Worktree>> {
        let output = self.run_checked(&["list", "--format=json"])?;
        parse_worktree_list(&String::from_utf8_lossy(&output.stdout))
    }

    /// Remove the worktree for `branch`. Returns false if `wt` refused.
    #[instrument(skip_all, fields(branch))]
    pub fn remove(&self, branch: &str) -> Result<bool> {
        let out = self.run(&["remove", branch])?;
        if !out.status.success() {
            debug!(stderr = %String::from_utf8_lossy(&out.stderr).trim(), "worktree removal refused");
        }
        Ok(out.status.success())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("wt {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("wt")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn wt {}", args.join(" ")))
    }
}

impl WorktreeManager for Wt {
    fn find(&self, branch: &str) -> Result<Option<PathBuf>> {
        Ok(find_branch_path(&self.list()?, branch))
    }

    #[instrument(skip_all, fields(branch))]
    fn create(&self, branch: &str) -> Result<PathBuf> {
        debug!(branch, "creating worktree");
        self.run_checked(&["switch", "--create", branch])?;
        self.find(branch)?
            .ok_or_else(|| anyhow!("worktree for {branch} not listed after creation"))
    }
}

fn parse_worktree_list(json: &str) -> Result<Vec<Worktree>> {
    serde_json::from_str(json).context("parse wt list json")
}

fn find_branch_path(worktrees: &[Worktree], branch: &str) -> Option<PathBuf> {
    worktrees
        .iter()
        .find(|wt| wt.branch.as_deref() == Some(branch))
        .and_then(|wt| wt.path.clone())
}
