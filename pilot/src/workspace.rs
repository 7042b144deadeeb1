//! Repository context shared by workflow commands.
//!
//! Commands never change the process working directory. The main checkout
//! and each issue worktree are addressed by path, and every adapter is
//! rooted at the directory it should act in.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use tracing::{debug, info};

use crate::ci_loop::{CiLoop, CiLoopOutcome, LoopSettings};
use crate::console;
use crate::io::agent::AgentCli;
use crate::io::ci::provider_from_config;
use crate::io::config::{PilotConfig, load_config};
use crate::io::git::Git;
use crate::io::github::{CodeHost, GhCli};
use crate::io::init::{PilotPaths, copy_pilot_dir, ensure_initialized, find_repo_root};
use crate::io::objective::{ObjectiveRepository, objective_repository_from_config};
use crate::io::prompt::{Prompts, render_branch_name};
use crate::io::secrets::resolve_ci_token;
use crate::io::sleep::ThreadSleeper;
use crate::io::worktree::{WorktreeManager, Wt};

/// An initialized repository and its configuration.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub paths: PilotPaths,
    pub config: PilotConfig,
}

impl Workspace {
    /// Locate the repository containing `cwd` and load its configuration.
    ///
    /// Errors if `pilot init` has not been run there.
    pub fn discover(cwd: &Path) -> Result<Self> {
        let paths = PilotPaths::new(find_repo_root(cwd));
        ensure_initialized(&paths)?;
        let config = load_config(&paths.config_path)?;
        debug!(root = %paths.root.display(), "workspace loaded");
        Ok(Self { paths, config })
    }

    pub fn branch_name(&self, identifier: &str) -> Result<String> {
        render_branch_name(&self.config.repo.branch_name, identifier)
    }

    pub fn objectives(&self) -> Box<dyn ObjectiveRepository> {
        objective_repository_from_config(&self.config.objective_repository, &self.paths)
    }

    /// Agent harness running in `workdir`, keeping transcripts in its `.pilot/logs`.
    pub fn agent(&self, workdir: &Path) -> AgentCli {
        AgentCli::from_config(&self.config.agent_harness, workdir)
            .with_transcripts(PilotPaths::new(workdir).logs_dir)
    }

    /// Path of the worktree for `branch_name`.
    ///
    /// When we are already on that branch the current checkout is used.
    /// Otherwise an existing worktree is reused, or (with `create`) a new
    /// one is made and seeded with a copy of `.pilot/`.
    pub fn enter_worktree(&self, branch_name: &str, create: bool) -> Result<PathBuf> {
        self.enter_worktree_with(&Wt::new(&self.paths.root), branch_name, create)
    }

    pub fn enter_worktree_with(
        &self,
        worktrees: &dyn WorktreeManager,
        branch_name: &str,
        create: bool,
    ) -> Result<PathBuf> {
        let git = Git::new(&self.paths.root);
        if git.current_branch().ok().as_deref() == Some(branch_name) {
            console::info(format!("Already in worktree for branch {branch_name}"));
            return Ok(self.paths.root.clone());
        }

        if let Some(path) = worktrees.find(branch_name)? {
            console::info(format!("Using worktree {}", path.display()));
            return Ok(path);
        }
        if !create {
            bail!(
                "no worktree found for branch {branch_name}; create one with `pilot plan` or `pilot execute`"
            );
        }

        let path = worktrees.create(branch_name)?;
        let copied = copy_pilot_dir(
            &self.paths.pilot_dir,
            &PilotPaths::new(&path).pilot_dir,
            false,
        )?;
        info!(worktree = %path.display(), entries = copied.len(), "seeded worktree .pilot");
        console::success(format!("Created worktree {}", path.display()));
        Ok(path)
    }

    /// Run the CI feedback loop for `branch_name` inside `worktree`.
    pub fn run_ci_loop(
        &self,
        worktree: &Path,
        identifier: &str,
        branch_name: &str,
        pr_number: Option<String>,
        max_retries: Option<u32>,
    ) -> Result<CiLoopOutcome> {
        let worktree_paths = PilotPaths::new(worktree);
        let git = Git::new(worktree);
        let gh = GhCli::new(worktree);
        let token = resolve_ci_token(&self.paths.secrets_path)?;
        let ci = provider_from_config(&self.config.ci, gh.repo_slug()?, token)?;
        let agent = self.agent(worktree);
        let prompts = Prompts::new(&self.config.prompts)?;

        console::info("Proceeding to monitor CI build status...");
        CiLoop {
            vcs: &git,
            host: &gh,
            ci: ci.as_ref(),
            agent: &agent,
            sleeper: &ThreadSleeper,
            prompts: &prompts,
            paths: &worktree_paths,
            settings: LoopSettings::from_config(&self.config.ci).with_max_retries(max_retries),
        }
        .run(identifier, branch_name, pr_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::init::init_pilot;
    use crate::test_support::{FakeWorktrees, TestRepo};

    #[test]
    fn discover_requires_initialized_repo() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = Workspace::discover(temp.path()).unwrap_err();
        assert!(err.to_string().contains("pilot init"));
    }

    #[test]
    fn discover_from_subdirectory_finds_repo_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(temp.path().join(".git")).expect("mkdir .git");
        init_pilot(temp.path()).expect("init");
        let nested = temp.path().join("src/deep");
        std::fs::create_dir_all(&nested).expect("mkdir");

        let ws = Workspace::discover(&nested).expect("discover");
        assert_eq!(ws.paths.root, temp.path());
        assert_eq!(ws.branch_name("42").expect("branch"), "issue-42");
    }

    #[test]
    fn new_worktree_is_seeded_with_main_pilot_dir() {
        let repo = TestRepo::new().expect("repo");
        let (main, _) = init_pilot(repo.path()).expect("init");
        std::fs::write(main.plan_file("7"), "the plan").expect("write plan");
        let ws = Workspace {
            paths: main.clone(),
            config: PilotConfig::default(),
        };
        let base = tempfile::tempdir().expect("tempdir");
        let worktrees = FakeWorktrees::new(base.path());

        let path = ws
            .enter_worktree_with(&worktrees, "issue-7", true)
            .expect("enter");

        let seeded = PilotPaths::new(&path);
        assert!(seeded.config_path.is_file());
        assert!(seeded.secrets_path.is_file());
        assert_eq!(
            std::fs::read_to_string(seeded.plan_file("7")).expect("read plan"),
            "the plan"
        );

        let again = ws
            .enter_worktree_with(&worktrees, "issue-7", true)
            .expect("re-enter");
        assert_eq!(again, path);
        assert_eq!(worktrees.created(), 1);
    }

    #[test]
    fn missing_worktree_is_an_error_without_create() {
        let repo = TestRepo::new().expect("repo");
        let (main, _) = init_pilot(repo.path()).expect("init");
        let ws = Workspace {
            paths: main,
            config: PilotConfig::default(),
        };
        let base = tempfile::tempdir().expect("tempdir");
        let worktrees = FakeWorktrees::new(base.path());

        let err = ws
            .enter_worktree_with(&worktrees, "issue-7", false)
            .unwrap_err();

        assert!(err.to_string().contains("no worktree found"));
        assert_eq!(worktrees.created(), 0);
    }

    #[test]
    fn current_branch_checkout_is_reused() {
        let repo = TestRepo::new().expect("repo");
        repo.git(&["checkout", "--quiet", "-b", "issue-9"]).expect("checkout");
        let (main, _) = init_pilot(repo.path()).expect("init");
        let ws = Workspace {
            paths: main,
            config: PilotConfig::default(),
        };
        let base = tempfile::tempdir().expect("tempdir");
        let worktrees = FakeWorktrees::new(base.path());

        let path = ws
            .enter_worktree_with(&worktrees, "issue-9", true)
            .expect("enter");

        assert_eq!(path, repo.path());
        assert_eq!(worktrees.created(), 0);
    }
}
