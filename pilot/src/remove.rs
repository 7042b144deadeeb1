//! `pilot remove`: clean up the worktree and branches of an issue.
//!
//! Every step is best-effort; a missing worktree or branch is reported as a
//! warning and the remaining steps still run.

use anyhow::Result;
use tracing::{instrument, warn};

use crate::console;
use crate::io::git::Git;
use crate::io::worktree::Wt;
use crate::workspace::Workspace;

/// What `remove` managed to delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveReport {
    pub worktree: bool,
    pub local_branch: bool,
    pub remote_branch: bool,
}

#[instrument(skip_all, fields(identifier))]
pub fn remove(ws: &Workspace, identifier: &str) -> Result<RemoveReport> {
    let branch_name = ws.branch_name(identifier)?;
    let root = &ws.paths.root;
    let git = Git::new(root);
    let wt = Wt::new(root);

    // The worktree goes first: git refuses to delete a checked-out branch.
    let report = RemoveReport {
        worktree: step("worktree", &branch_name, wt.remove(&branch_name)),
        local_branch: step("local branch", &branch_name, git.delete_branch(&branch_name)),
        remote_branch: step(
            "remote branch",
            &branch_name,
            git.delete_remote_branch(&branch_name),
        ),
    };
    Ok(report)
}

fn step(what: &str, branch_name: &str, result: Result<bool>) -> bool {
    match result {
        Ok(true) => {
            console::success(format!("Removed {what} {branch_name}"));
            true
        }
        Ok(false) => {
            console::warning(format!("No {what} {branch_name} to remove"));
            false
        }
        Err(err) => {
            warn!(err = %format!("{err:#}"), what, "remove step failed");
            console::warning(format!("Could not remove {what} {branch_name}: {err:#}"));
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::PilotConfig;
    use crate::io::init::{PilotPaths, init_pilot};
    use crate::test_support::TestRepo;

    #[test]
    fn deletes_local_branch_and_tolerates_missing_remote() {
        let repo = TestRepo::new().expect("repo");
        repo.git(&["branch", "issue-7"]).expect("branch");
        init_pilot(repo.path()).expect("init");
        let ws = Workspace {
            paths: PilotPaths::new(repo.path()),
            config: PilotConfig::default(),
        };

        let report = remove(&ws, "7").expect("remove");

        assert!(report.local_branch);
        assert!(!report.remote_branch);
        assert!(!Git::new(repo.path()).branch_exists("issue-7").expect("check"));
    }

    #[test]
    fn missing_branch_is_not_an_error() {
        let repo = TestRepo::new().expect("repo");
        init_pilot(repo.path()).expect("init");
        let ws = Workspace {
            paths: PilotPaths::new(repo.path()),
            config: PilotConfig::default(),
        };

        let report = remove(&ws, "404").expect("remove");

        assert!(!report.local_branch);
    }
}
