//! Stable exit codes for pilot CLI commands.

use crate::ci_loop::{CiLoopOutcome, FatalReason};

/// Command succeeded; for loop commands, CI is green.
pub const OK: i32 = 0;
/// Invalid configuration, fatal loop condition, or any other error.
pub const FAILED: i32 = 1;
/// CI still failing after every fix attempt was spent.
pub const EXHAUSTED: i32 = 2;
/// The CI build never concluded within the wait budget.
pub const TIMEOUT: i32 = 3;

pub fn for_outcome(outcome: &CiLoopOutcome) -> i32 {
    match outcome {
        CiLoopOutcome::Resolved { .. } => OK,
        CiLoopOutcome::Exhausted { .. } => EXHAUSTED,
        CiLoopOutcome::Fatal(FatalReason::Timeout { .. }) => TIMEOUT,
        CiLoopOutcome::Fatal(_) => FAILED,
    }
}
