//! `.pilot/` scaffolding, path layout and copying into worktrees.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use tracing::debug;
use walkdir::WalkDir;

use super::config::{PilotConfig, write_config};
use super::secrets::SECRETS_TEMPLATE;
use crate::core::path::{failure_details_file_name, objective_file_name, plan_file_name};

/// Directory name of the workflow state inside a repository.
pub const PILOT_DIR: &str = ".pilot";
/// Line `pilot init` adds to `.gitignore`.
pub const SECRETS_IGNORE_ENTRY: &str = ".pilot/secrets.toml";

/// All canonical paths within `.pilot/` for a repository root.
#[derive(Debug, Clone)]
pub struct PilotPaths {
    pub root: PathBuf,
    pub pilot_dir: PathBuf,
    pub plans_dir: PathBuf,
    pub objectives_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub tmp_dir: PathBuf,
    pub config_path: PathBuf,
    pub secrets_path: PathBuf,
    pub gitignore_path: PathBuf,
}

impl PilotPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let pilot_dir = root.join(PILOT_DIR);
        Self {
            plans_dir: pilot_dir.join("plans"),
            objectives_dir: pilot_dir.join("objectives"),
            logs_dir: pilot_dir.join("logs"),
            tmp_dir: pilot_dir.join("tmp"),
            config_path: pilot_dir.join("config.toml"),
            secrets_path: pilot_dir.join("secrets.toml"),
            gitignore_path: root.join(".gitignore"),
            pilot_dir,
            root,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.pilot_dir.is_dir()
    }

    pub fn plan_file(&self, identifier: &str) -> PathBuf {
        self.plans_dir.join(plan_file_name(identifier))
    }

    pub fn objective_file(&self, identifier: &str) -> PathBuf {
        self.objectives_dir.join(objective_file_name(identifier))
    }

    /// Per-attempt CI failure artifact.
    pub fn failure_details_file(&self, branch_name: &str, attempt: u32) -> PathBuf {
        self.tmp_dir
            .join(failure_details_file_name(branch_name, attempt))
    }
}

/// Result of `init_pilot`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    Created { gitignore_updated: bool },
    AlreadyInitialized,
}

/// Create `.pilot/` scaffolding in `root`. Existing `.pilot/` is left alone.
pub fn init_pilot(root: &Path) -> Result<(PilotPaths, InitOutcome)> {
    let paths = PilotPaths::new(root);
    if paths.pilot_dir.exists() {
        if !paths.pilot_dir.is_dir() {
            bail!("pilot init: {} exists but is not a directory", paths.pilot_dir.display());
        }
        return Ok((paths, InitOutcome::AlreadyInitialized));
    }

    for dir in [
        &paths.pilot_dir,
        &paths.plans_dir,
        &paths.objectives_dir,
        &paths.logs_dir,
        &paths.tmp_dir,
    ] {
        create_dir(dir)?;
    }
    if !paths.config_path.exists() {
        write_config(&paths.config_path, &PilotConfig::default())?;
    }
    if !paths.secrets_path.exists() {
        fs::write(&paths.secrets_path, SECRETS_TEMPLATE)
            .with_context(|| format!("write {}", paths.secrets_path.display()))?;
    }
    let gitignore_updated = ensure_gitignore_entry(&paths.gitignore_path)?;

    Ok((paths, InitOutcome::Created { gitignore_updated }))
}

/// Error unless `.pilot/` exists under the paths' root.
pub fn ensure_initialized(paths: &PilotPaths) -> Result<()> {
    if paths.is_initialized() {
        return Ok(());
    }
    Err(anyhow!(
        "pilot has not been initialized in {}; run `pilot init` first",
        paths.root.display()
    ))
}

/// Append the secrets entry to `.gitignore` unless already present.
///
/// Returns true when the file was changed.
pub fn ensure_gitignore_entry(gitignore_path: &Path) -> Result<bool> {
    let existing = if gitignore_path.exists() {
        fs::read_to_string(gitignore_path)
            .with_context(|| format!("read {}", gitignore_path.display()))?
    } else {
        String::new()
    };
    if existing.lines().any(|line| line.trim() == SECRETS_IGNORE_ENTRY) {
        return Ok(false);
    }
    let mut updated = existing;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(&format!("\n# pilot secrets\n{SECRETS_IGNORE_ENTRY}\n"));
    fs::write(gitignore_path, updated)
        .with_context(|| format!("write {}", gitignore_path.display()))?;
    Ok(true)
}

/// Nearest ancestor of `start` (inclusive) containing `.git`; `start` if none.
///
/// `.git` may be a file inside linked worktrees, which keeps a worktree's own
/// `.pilot/` in use there.
pub fn find_repo_root(start: &Path) -> PathBuf {
    start
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .unwrap_or(start)
        .to_path_buf()
}

/// Copy every top-level entry of `src` into `dst` (recursively).
///
/// With `replace`, existing destination entries are removed first; otherwise
/// existing files are overwritten in place. Returns the copied entry names.
pub fn copy_pilot_dir(src: &Path, dst: &Path, replace: bool) -> Result<Vec<String>> {
    if !src.is_dir() {
        bail!("source {} is not a directory", src.display());
    }
    if same_path(src, dst) {
        debug!(path = %src.display(), "source and destination are the same, nothing to copy");
        return Ok(Vec::new());
    }
    create_dir(dst)?;

    let mut entries: Vec<_> = fs::read_dir(src)
        .with_context(|| format!("read directory {}", src.display()))?
        .collect::<std::io::Result<_>>()
        .with_context(|| format!("list {}", src.display()))?;
    entries.sort_by_key(|entry| entry.file_name());

    let mut copied = Vec::new();
    for entry in entries {
        let name = entry.file_name();
        let target = dst.join(&name);
        if replace && target.exists() {
            remove_path(&target)?;
        }
        copy_tree(&entry.path(), &target)?;
        copied.push(name.to_string_lossy().into_owned());
    }
    Ok(copied)
}

fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.with_context(|| format!("walk {}", src.display()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("relativize {}", entry.path().display()))?;
        // A top-level file is walked as itself, with an empty relative path.
        let target = if relative.as_os_str().is_empty() {
            dst.to_path_buf()
        } else {
            dst.join(relative)
        };
        if entry.file_type().is_dir() {
            create_dir(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                create_dir(parent)?;
            }
            fs::copy(entry.path(), &target).with_context(|| {
                format!("copy {} to {}", entry.path().display(), target.display())
            })?;
        }
    }
    Ok(())
}

fn remove_path(path: &Path) -> Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
    .with_context(|| format!("remove {}", path.display()))
}

fn same_path(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}
