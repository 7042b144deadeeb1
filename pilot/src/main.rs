//! Agent-driven issue workflow.
//!
//! Plans and implements an issue with a coding agent in a dedicated
//! worktree, then keeps the resulting pull request green by feeding CI
//! failures back to the agent.

use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use pilot::act_on_ci::act_on_ci;
use pilot::ci_loop::CiLoopOutcome;
use pilot::console;
use pilot::execute::execute;
use pilot::exit_codes;
use pilot::feedback::{FeedbackOptions, feedback};
use pilot::io::init::{InitOutcome, find_repo_root, init_pilot};
use pilot::logging;
use pilot::plan::{PlanOptions, plan};
use pilot::remove::remove;
use pilot::sync_config::sync_config;
use pilot::workspace::Workspace;

#[derive(Parser)]
#[command(
    name = "pilot",
    version,
    about = "Drive a coding agent from an issue to a green pull request"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.pilot/` with default config and secrets templates.
    Init,
    /// Have the agent write a plan for an issue, then execute it.
    Plan {
        identifier: String,
        /// Skip plan review and execute immediately.
        #[arg(short, long)]
        yes: bool,
        #[command(flatten)]
        retries: Retries,
    },
    /// Implement an issue in its worktree and watch CI.
    Execute {
        identifier: String,
        #[command(flatten)]
        retries: Retries,
    },
    /// Watch CI for an issue's pull request and fix failures.
    Ci {
        identifier: String,
        /// PR number; looked up from the branch when omitted.
        #[arg(long)]
        pr: Option<String>,
        #[command(flatten)]
        retries: Retries,
    },
    /// Apply reviewer feedback to an issue's pull request and watch CI.
    Feedback {
        identifier: String,
        /// Feedback text; read from stdin (ending with an empty line) when omitted.
        #[arg(short, long)]
        message: Option<String>,
        #[command(flatten)]
        retries: Retries,
    },
    /// Delete an issue's worktree, local branch and remote branch.
    Remove { identifier: String },
    /// Copy the main `.pilot/` into an issue's worktree.
    SyncConfig { identifier: String },
}

#[derive(Args, Debug, Clone, Copy)]
struct Retries {
    /// Override `[ci] max_retries` for this run.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    max_retries: Option<u32>,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::FAILED);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir().context("read current directory")?;
    let workspace = || Workspace::discover(&cwd);
    let stdin = io::stdin();
    let mut input = stdin.lock();
    match cli.command {
        Command::Init => cmd_init(&cwd),
        Command::Plan {
            identifier,
            yes,
            retries,
        } => {
            let opts = PlanOptions {
                identifier,
                yes,
                max_retries: retries.max_retries,
            };
            match plan(&workspace()?, &opts, &mut input)? {
                Some(outcome) => Ok(report(&outcome)),
                None => Ok(exit_codes::OK),
            }
        }
        Command::Execute {
            identifier,
            retries,
        } => Ok(report(&execute(&workspace()?, &identifier, retries.max_retries)?)),
        Command::Ci {
            identifier,
            pr,
            retries,
        } => Ok(report(&act_on_ci(
            &workspace()?,
            &identifier,
            pr,
            retries.max_retries,
        )?)),
        Command::Feedback {
            identifier,
            message,
            retries,
        } => {
            let opts = FeedbackOptions {
                identifier,
                message,
                max_retries: retries.max_retries,
            };
            Ok(report(&feedback(&workspace()?, &opts, &mut input)?))
        }
        Command::Remove { identifier } => {
            remove(&workspace()?, &identifier)?;
            Ok(exit_codes::OK)
        }
        Command::SyncConfig { identifier } => {
            sync_config(&workspace()?, &identifier)?;
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_init(cwd: &Path) -> Result<i32> {
    let (paths, outcome) = init_pilot(&find_repo_root(cwd))?;
    match outcome {
        InitOutcome::AlreadyInitialized => {
            console::warning(format!(
                "{} already exists; nothing to do",
                paths.pilot_dir.display()
            ));
        }
        InitOutcome::Created { gitignore_updated } => {
            console::success(format!("Created {}", paths.pilot_dir.display()));
            if gitignore_updated {
                console::info(format!(
                    "Added .pilot/secrets.toml to {}",
                    paths.gitignore_path.display()
                ));
            }
            console::info(format!(
                "Set ci_api_token in {} before running CI commands",
                paths.secrets_path.display()
            ));
        }
    }
    Ok(exit_codes::OK)
}

fn report(outcome: &CiLoopOutcome) -> i32 {
    match outcome {
        CiLoopOutcome::Resolved { fix_attempts } => {
            console::success(format!("Done after {fix_attempts} fix attempt(s)"));
        }
        CiLoopOutcome::Exhausted { fix_attempts } => {
            console::error(format!(
                "CI still failing after {fix_attempts} fix attempt(s)"
            ));
        }
        CiLoopOutcome::Fatal(reason) => console::error(reason.to_string()),
    }
    exit_codes::for_outcome(outcome)
}
