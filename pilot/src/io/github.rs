//! Code host adapter backed by the GitHub CLI (`gh`).

use std::path::PathBuf;
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

use crate::core::types::RepoSlug;

/// Pull request queries the workflow needs from the code host.
pub trait CodeHost {
    /// Number of the first open PR whose head branch is `branch`.
    fn find_open_pr_for_branch(&self, branch: &str) -> Result<Option<String>>;
    /// True when the PR identified by `identifier` (number or branch) is open.
    fn is_pr_open(&self, identifier: &str) -> Result<bool>;
    /// Head branch of a PR.
    fn pr_head_branch(&self, pr_number: &str) -> Result<String>;
    /// Owner and name of the current repository.
    fn repo_slug(&self) -> Result<RepoSlug>;
}

/// [`CodeHost`] implemented with `gh` subprocess calls in a workdir.
#[derive(Debug, Clone)]
pub struct GhCli {
    workdir: PathBuf,
}

impl GhCli {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// True when `gh auth status` succeeds.
    pub fn is_authenticated(&self) -> Result<bool> {
        Ok(self.run(&["auth", "status"])?.status.success())
    }

    /// Body and metadata of an issue, as printed by `gh issue view`.
    #[instrument(skip_all, fields(identifier))]
    pub fn issue_view(&self, identifier: &str) -> Result<String> {
        self.run_capture(&["issue", "view", identifier])
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("gh {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("gh")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn gh {}", args.join(" ")))
    }
}

impl CodeHost for GhCli {
    #[instrument(skip_all, fields(branch))]
    fn find_open_pr_for_branch(&self, branch: &str) -> Result<Option<String>> {
        let out = self.run_capture(&[
            "pr",
            "list",
            "--head",
            branch,
            "--state",
            "open",
            "--json",
            "number",
            "-q",
            ".[0].number",
        ])?;
        let number = parse_pr_number_output(&out);
        debug!(?number, "open PR lookup");
        Ok(number)
    }

    fn is_pr_open(&self, identifier: &str) -> Result<bool> {
        let out = self.run_capture(&["pr", "view", identifier, "--json", "state", "-q", ".state"])?;
        Ok(out.trim() == "OPEN")
    }

    fn pr_head_branch(&self, pr_number: &str) -> Result<String> {
        let out = self.run_capture(&[
            "pr",
            "view",
            pr_number,
            "--json",
            "headRefName",
            "-q",
            ".headRefName",
        ])?;
        let branch = out.trim();
        if branch.is_empty() {
            return Err(anyhow!("PR #{pr_number} has no head branch"));
        }
        Ok(branch.to_string())
    }

    fn repo_slug(&self) -> Result<RepoSlug> {
        let out = self.run_capture(&["repo", "view", "--json", "owner,name"])?;
        parse_repo_view(&out)
    }
}

/// `gh ... -q .[0].number` prints nothing (or `null`) when there is no match.
fn parse_pr_number_output(out: &str) -> Option<String> {
    let trimmed = out.trim();
    if trimmed.is_empty() || trimmed == "null" || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(trimmed.to_string())
}

#[derive(serde::Deserialize)]
struct RepoView {
    owner: RepoOwner,
    name: String,
}

#[derive(serde::Deserialize)]
struct RepoOwner {
    login: String,
}

fn parse_repo_view(json: &str) -> Result<RepoSlug> {
    let view: RepoView = serde_json::from_str(json).context("parse gh repo view json")?;
    Ok(RepoSlug {
        owner: view.owner.login,
        name: view.name,
    })
}
