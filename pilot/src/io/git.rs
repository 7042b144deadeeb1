//! Git adapter for workflow commands.
//!
//! We only need a handful of branch and status queries, so we keep a small,
//! explicit wrapper around `git` subprocess calls rooted at one workdir.

use std::path::PathBuf;
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// Branch identity of a working copy.
///
/// The CI loop only needs to know which branch it is on; tests substitute a
/// fixed answer.
pub trait VersionControl {
    fn current_branch(&self) -> Result<String>;
}

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl VersionControl for Git {
    fn current_branch(&self) -> Result<String> {
        Git::current_branch(self)
    }
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["branch", "--show-current"])?;
        let name = out.trim().to_string();
        if name.is_empty() {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD (not on any branch)"));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    /// True when `workdir` belongs to a linked worktree rather than the main checkout.
    pub fn is_linked_worktree(&self) -> Result<bool> {
        let git_dir = self.run_capture(&["rev-parse", "--path-format=absolute", "--git-dir"])?;
        let common_dir =
            self.run_capture(&["rev-parse", "--path-format=absolute", "--git-common-dir"])?;
        Ok(git_dir.trim() != common_dir.trim())
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// Tracked files with staged or unstaged modifications (untracked files ignored).
    pub fn uncommitted_changes(&self) -> Result<Vec<StatusEntry>> {
        Ok(self
            .status_porcelain()?
            .into_iter()
            .filter(|entry| entry.code != "??")
            .collect())
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let status = self
            .run(&[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ])?
            .status;
        Ok(status.success())
    }

    /// Check whether `origin` has a branch with this name.
    pub fn remote_branch_exists(&self, branch: &str) -> Result<bool> {
        let out = self.run_capture(&["ls-remote", "--heads", "origin", branch])?;
        let wanted = format!("refs/heads/{branch}");
        Ok(out
            .lines()
            .any(|line| line.split_whitespace().nth(1) == Some(wanted.as_str())))
    }

    /// Force-delete a local branch. Returns false if git refused (e.g. missing).
    #[instrument(skip_all, fields(branch))]
    pub fn delete_branch(&self, branch: &str) -> Result<bool> {
        let out = self.run(&["branch", "-D", branch])?;
        if !out.status.success() {
            debug!(stderr = %String::from_utf8_lossy(&out.stderr).trim(), "branch delete refused");
        }
        Ok(out.status.success())
    }

    /// Delete a branch on `origin`. Returns false if the push was rejected.
    #[instrument(skip_all, fields(branch))]
    pub fn delete_remote_branch(&self, branch: &str) -> Result<bool> {
        let out = self.run(&["push", "origin", "--delete", branch])?;
        if !out.status.success() {
            debug!(stderr = %String::from_utf8_lossy(&out.stderr).trim(), "remote delete refused");
        }
        Ok(out.status.success())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}
