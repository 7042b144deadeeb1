//! `pilot ci`: resume the CI loop for an issue that already has a worktree.

use anyhow::Result;
use tracing::instrument;

use crate::ci_loop::CiLoopOutcome;
use crate::workspace::Workspace;

#[instrument(skip_all, fields(identifier))]
pub fn act_on_ci(
    ws: &Workspace,
    identifier: &str,
    pr_number: Option<String>,
    max_retries: Option<u32>,
) -> Result<CiLoopOutcome> {
    let branch_name = ws.branch_name(identifier)?;
    let worktree = ws.enter_worktree(&branch_name, false)?;
    ws.run_ci_loop(&worktree, identifier, &branch_name, pr_number, max_retries)
}
