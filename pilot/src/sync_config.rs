//! `pilot sync-config`: refresh an issue worktree's `.pilot/` from the main checkout.

use anyhow::{Result, bail};
use tracing::instrument;

use crate::console;
use crate::io::git::Git;
use crate::io::init::{PilotPaths, copy_pilot_dir};
use crate::workspace::Workspace;

/// Copy the main `.pilot/` into the worktree for `identifier`, replacing
/// existing entries. Returns the names of the copied top-level entries.
#[instrument(skip_all, fields(identifier))]
pub fn sync_config(ws: &Workspace, identifier: &str) -> Result<Vec<String>> {
    if Git::new(&ws.paths.root).is_linked_worktree()? {
        bail!("sync-config must be run from the main repository, not from a worktree");
    }
    let branch_name = ws.branch_name(identifier)?;
    let worktree = ws.enter_worktree(&branch_name, false)?;
    let copied = copy_pilot_dir(
        &ws.paths.pilot_dir,
        &PilotPaths::new(&worktree).pilot_dir,
        true,
    )?;
    console::success(format!(
        "Synced {} into {}",
        copied.join(", "),
        worktree.display()
    ));
    Ok(copied)
}
