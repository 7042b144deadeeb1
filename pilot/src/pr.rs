//! Resolve the PR an agent run produced.

use anyhow::Result;
use tracing::debug;

use crate::core::pr_number::{PrMatch, Strategy, extract_from_text};
use crate::io::github::CodeHost;

/// PR number from the agent's output, falling back to the open PR for
/// `branch_name` on the code host. `None` if every strategy fails.
pub fn resolve_pr_number(
    agent_output: &str,
    branch_name: &str,
    host: &dyn CodeHost,
) -> Result<Option<PrMatch>> {
    if let Some(found) = extract_from_text(agent_output) {
        debug!(number = %found.number, strategy = ?found.strategy, "PR number found in output");
        return Ok(Some(found));
    }
    debug!(branch = branch_name, "no PR number in output, asking code host");
    Ok(host
        .find_open_pr_for_branch(branch_name)?
        .map(|number| PrMatch {
            number,
            strategy: Strategy::BranchLookup,
        }))
}
