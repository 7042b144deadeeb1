//! I/O adapters for pilot commands.

pub mod agent;
pub mod ci;
pub mod config;
pub mod failure_log;
pub mod git;
pub mod github;
pub mod http;
pub mod init;
pub mod objective;
pub mod process;
pub mod prompt;
pub mod secrets;
pub mod sleep;
pub mod worktree;
