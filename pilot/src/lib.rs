//! Drive a coding agent from an issue to a green pull request.
//!
//! `pilot` downloads an objective, has an agent plan and implement it in a
//! dedicated worktree, then watches CI and feeds failures back to the agent
//! until the build passes or the retry budget runs out.
//!
//! - **[`core`]**: Pure, deterministic logic (PR number extraction, status
//!   mapping, artifact naming, wait budgets). No I/O.
//! - **[`io`]**: Side effects (git, `gh`, `wt`, CircleCI, the agent CLI,
//!   config and prompt files), each behind a trait where tests need a fake.
//!
//! Orchestration modules ([`ci_loop`], [`plan`], [`execute`], [`act_on_ci`],
//! [`feedback`], [`remove`], [`sync_config`]) wire the two together to
//! implement CLI commands.

pub mod act_on_ci;
pub mod ci_loop;
pub mod console;
pub mod core;
pub mod execute;
pub mod exit_codes;
pub mod feedback;
pub mod io;
pub mod logging;
pub mod plan;
pub mod pr;
pub mod remove;
pub mod sync_config;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod workspace;
