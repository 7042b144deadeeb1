//! `pilot plan`: have the agent write an implementation plan, then execute it.
//!
//! Planning runs in the main checkout. The plan lands in
//! `.pilot/plans/plan_<id>.md`, which `execute` later finds in the freshly
//! seeded worktree.

use std::io::BufRead;

use anyhow::{Result, bail};
use tracing::{info, instrument};

use crate::ci_loop::CiLoopOutcome;
use crate::console;
use crate::execute::execute;
use crate::io::agent::AgentHarness;
use crate::io::git::Git;
use crate::io::github::GhCli;
use crate::io::prompt::Prompts;
use crate::workspace::Workspace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanOptions {
    pub identifier: String,
    /// Skip the review prompt and go straight to execution.
    pub yes: bool,
    pub max_retries: Option<u32>,
}

/// Plan and, unless the user stops after review, execute `identifier`.
///
/// Returns `None` when the user chose not to proceed past the plan.
#[instrument(skip_all, fields(identifier = %opts.identifier))]
pub fn plan(
    ws: &Workspace,
    opts: &PlanOptions,
    input: &mut impl BufRead,
) -> Result<Option<CiLoopOutcome>> {
    let root = &ws.paths.root;
    let gh = GhCli::new(root);
    if !gh.is_authenticated()? {
        bail!("GitHub CLI is not authenticated; run `gh auth login` first");
    }

    let git = Git::new(root);
    let changes = git.uncommitted_changes()?;
    if !changes.is_empty() {
        console::warning(format!(
            "You have {} uncommitted change(s) in {}",
            changes.len(),
            root.display()
        ));
        if !console::confirm("Continue anyway?", input)? {
            bail!("aborted: commit or stash your changes first");
        }
    }

    console::info(format!("Downloading objective {}...", opts.identifier));
    let objective_file = ws.objectives().download(&opts.identifier)?;

    let branch_name = ws.branch_name(&opts.identifier)?;
    if git.branch_exists(&branch_name)? {
        bail!(
            "branch {branch_name} already exists locally; run `pilot remove {}` first",
            opts.identifier
        );
    }
    if git.remote_branch_exists(&branch_name)? {
        bail!("branch {branch_name} already exists on origin");
    }

    let plan_file = ws.paths.plan_file(&opts.identifier);
    let prompts = Prompts::new(&ws.config.prompts)?;
    let instructions = prompts.plan(&opts.identifier, &objective_file, &plan_file)?;

    console::info("Creating plan...");
    let output = ws.agent(root).invoke(&instructions);
    console::block("Agent output:", &output);

    if !plan_file.is_file() {
        bail!("agent did not create the plan file {}", plan_file.display());
    }
    info!(plan = %plan_file.display(), "plan written");
    console::success(format!("Plan written to {}", plan_file.display()));

    if !opts.yes {
        console::info("Please review the plan before continuing.");
        if !console::confirm("Proceed with implementation?", input)? {
            console::info(format!(
                "Stopped after planning. Run `pilot execute {}` when ready.",
                opts.identifier
            ));
            return Ok(None);
        }
    }

    execute(ws, &opts.identifier, opts.max_retries).map(Some)
}
