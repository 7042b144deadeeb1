//! Test-only fakes and fixtures.
//!
//! Scripted collaborators record what the workflow asked of them so tests
//! can assert on call counts without spawning processes or sleeping.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::types::{BuildStatus, PullRequest, RepoSlug};
use crate::io::agent::AgentHarness;
use crate::io::ci::CiProvider;
use crate::io::git::VersionControl;
use crate::io::github::CodeHost;
use crate::io::http::{HttpGet, HttpResponse};
use crate::io::sleep::Sleeper;
use crate::io::worktree::WorktreeManager;

/// Temporary git repository on `main` with one commit.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp dir")?;
        let repo = Self { dir };
        repo.git(&["init", "--quiet", "--initial-branch=main"])?;
        repo.git(&["config", "user.email", "pilot@example.com"])?;
        repo.git(&["config", "user.name", "Pilot Test"])?;
        repo.git(&["config", "commit.gpgsign", "false"])?;
        std::fs::write(repo.path().join("README.md"), "test repo\n").context("write README")?;
        repo.git(&["add", "README.md"])?;
        repo.git(&["commit", "--quiet", "-m", "initial commit"])?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// CI provider that replays a status script, repeating the last entry.
pub struct ScriptedCi {
    statuses: RefCell<VecDeque<BuildStatus>>,
    details: Option<String>,
    status_calls: Cell<usize>,
    failure_calls: Cell<usize>,
    polled: RefCell<Vec<String>>,
}

impl ScriptedCi {
    pub fn new(statuses: Vec<BuildStatus>) -> Self {
        assert!(!statuses.is_empty(), "script needs at least one status");
        Self {
            statuses: RefCell::new(statuses.into()),
            details: Some("Job: test (#1) failed.".to_string()),
            status_calls: Cell::new(0),
            failure_calls: Cell::new(0),
            polled: RefCell::new(Vec::new()),
        }
    }

    pub fn with_details(mut self, details: &str) -> Self {
        self.details = Some(details.to_string());
        self
    }

    /// Make every `build_failures` call return an error.
    pub fn failing_details(mut self) -> Self {
        self.details = None;
        self
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.get()
    }

    pub fn failure_calls(&self) -> usize {
        self.failure_calls.get()
    }

    /// PR numbers passed to `build_status`, deduplicated in order.
    pub fn polled_prs(&self) -> Vec<String> {
        let mut prs = self.polled.borrow().clone();
        prs.dedup();
        prs
    }
}

impl CiProvider for ScriptedCi {
    fn build_status(&self, pr: &PullRequest) -> Result<BuildStatus> {
        self.status_calls.set(self.status_calls.get() + 1);
        self.polled.borrow_mut().push(pr.number.clone());
        let mut statuses = self.statuses.borrow_mut();
        let status = if statuses.len() > 1 {
            statuses.pop_front()
        } else {
            statuses.front().cloned()
        };
        status.ok_or_else(|| anyhow!("empty status script"))
    }

    fn build_failures(&self, _pr: &PullRequest) -> Result<String> {
        self.failure_calls.set(self.failure_calls.get() + 1);
        self.details
            .clone()
            .ok_or_else(|| anyhow!("CircleCI unavailable"))
    }
}

/// Agent that replays canned replies, repeating the last one.
pub struct ScriptedAgent {
    replies: RefCell<VecDeque<String>>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedAgent {
    pub fn new(replies: Vec<&str>) -> Self {
        assert!(!replies.is_empty(), "script needs at least one reply");
        Self {
            replies: RefCell::new(replies.into_iter().map(str::to_string).collect()),
            prompts: RefCell::new(Vec::new()),
        }
    }

    pub fn always(reply: &str) -> Self {
        Self::new(vec![reply])
    }

    pub fn invocations(&self) -> usize {
        self.prompts.borrow().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }
}

impl AgentHarness for ScriptedAgent {
    fn invoke(&self, instructions: &str) -> String {
        self.prompts.borrow_mut().push(instructions.to_string());
        let mut replies = self.replies.borrow_mut();
        if replies.len() > 1 {
            replies.pop_front().unwrap_or_default()
        } else {
            replies.front().cloned().unwrap_or_default()
        }
    }
}

/// Version control stuck on one branch.
pub struct FakeVcs {
    branch: String,
}

impl FakeVcs {
    pub fn on_branch(branch: &str) -> Self {
        Self {
            branch: branch.to_string(),
        }
    }
}

impl VersionControl for FakeVcs {
    fn current_branch(&self) -> Result<String> {
        Ok(self.branch.clone())
    }
}

/// Code host with at most one open PR.
pub struct FakeCodeHost {
    open_pr: Option<(String, String)>,
    pr_lookups: Cell<usize>,
}

impl FakeCodeHost {
    pub fn with_open_pr(number: &str, head_branch: &str) -> Self {
        Self {
            open_pr: Some((number.to_string(), head_branch.to_string())),
            pr_lookups: Cell::new(0),
        }
    }

    pub fn without_pr() -> Self {
        Self {
            open_pr: None,
            pr_lookups: Cell::new(0),
        }
    }

    pub fn pr_lookups(&self) -> usize {
        self.pr_lookups.get()
    }
}

impl CodeHost for FakeCodeHost {
    fn find_open_pr_for_branch(&self, branch: &str) -> Result<Option<String>> {
        self.pr_lookups.set(self.pr_lookups.get() + 1);
        Ok(self
            .open_pr
            .as_ref()
            .filter(|(_, head)| head == branch)
            .map(|(number, _)| number.clone()))
    }

    fn is_pr_open(&self, identifier: &str) -> Result<bool> {
        Ok(self
            .open_pr
            .as_ref()
            .is_some_and(|(number, head)| number == identifier || head == identifier))
    }

    fn pr_head_branch(&self, pr_number: &str) -> Result<String> {
        self.open_pr
            .as_ref()
            .filter(|(number, _)| number == pr_number)
            .map(|(_, head)| head.clone())
            .ok_or_else(|| anyhow!("PR #{pr_number} not found"))
    }

    fn repo_slug(&self) -> Result<RepoSlug> {
        Ok(RepoSlug {
            owner: "acme".to_string(),
            name: "widgets".to_string(),
        })
    }
}

/// Sleeper that records requested durations and returns immediately.
#[derive(Default)]
pub struct RecordingSleeper {
    slept: RefCell<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn slept(&self) -> Vec<Duration> {
        self.slept.borrow().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.slept.borrow_mut().push(duration);
    }
}

/// HTTP client serving canned responses by exact URL.
#[derive(Debug, Default)]
pub struct FixtureHttp {
    routes: HashMap<String, HttpResponse>,
    requests: RefCell<Vec<(String, Option<String>)>>,
}

impl FixtureHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, url: &str, status: u16, body: &str) -> Self {
        self.routes.insert(
            url.to_string(),
            HttpResponse {
                status,
                body: body.to_string(),
            },
        );
        self
    }

    /// Every `(url, token)` requested, in order.
    pub fn requests(&self) -> Vec<(String, Option<String>)> {
        self.requests.borrow().clone()
    }

    pub fn requested(&self) -> Vec<String> {
        self.requests().into_iter().map(|(url, _)| url).collect()
    }

    pub fn tokens(&self) -> Vec<Option<String>> {
        self.requests().into_iter().map(|(_, token)| token).collect()
    }
}

impl HttpGet for FixtureHttp {
    fn get(&self, url: &str, token: Option<&str>) -> Result<HttpResponse> {
        self.requests
            .borrow_mut()
            .push((url.to_string(), token.map(str::to_string)));
        self.routes
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("no fixture for {url}"))
    }
}

/// Worktree manager that creates plain directories under a base path.
pub struct FakeWorktrees {
    base: PathBuf,
    worktrees: RefCell<HashMap<String, PathBuf>>,
    created: Cell<usize>,
}

impl FakeWorktrees {
    pub fn new(base: &Path) -> Self {
        Self {
            base: base.to_path_buf(),
            worktrees: RefCell::new(HashMap::new()),
            created: Cell::new(0),
        }
    }

    pub fn created(&self) -> usize {
        self.created.get()
    }
}

impl WorktreeManager for FakeWorktrees {
    fn find(&self, branch: &str) -> Result<Option<PathBuf>> {
        Ok(self.worktrees.borrow().get(branch).cloned())
    }

    fn create(&self, branch: &str) -> Result<PathBuf> {
        let path = self.base.join(branch);
        std::fs::create_dir_all(&path)
            .with_context(|| format!("create {}", path.display()))?;
        self.worktrees
            .borrow_mut()
            .insert(branch.to_string(), path.clone());
        self.created.set(self.created.get() + 1);
        Ok(path)
    }
}
