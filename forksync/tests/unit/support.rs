//! Git fixtures: an upstream and a fork as local bare repositories, and a
//! working clone of the fork.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use tempfile::TempDir;

use forksync::app::shutdown::ShutdownSignal;
use forksync::app::state::AppState;
use forksync::registry::project::{Hook, Project};
use forksync::registry::Registry;
use forksync::storage::layout::StorageLayout;
use forksync::storage::settings::Settings;

pub fn has_git() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Run git in `dir` and return trimmed stdout; panics on failure
pub fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("LC_ALL", "C")
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("git runs");
    assert!(
        out.status.success(),
        "git {:?} failed in {}: {}",
        args,
        dir.display(),
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

/// Whether `rev` names a commit present in the repository at `dir`
pub fn has_object(dir: &Path, rev: &str) -> bool {
    Command::new("git")
        .args(["cat-file", "-e", &format!("{}^{{commit}}", rev)])
        .current_dir(dir)
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn identify(dir: &Path) {
    git(dir, &["config", "user.name", "forksync tests"]);
    git(dir, &["config", "user.email", "tests@forksync.invalid"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
}

pub fn commit_file(dir: &Path, file: &str, contents: &str, message: &str) -> String {
    std::fs::write(dir.join(file), contents).unwrap();
    git(dir, &["add", file]);
    git(dir, &["commit", "-q", "-m", message]);
    git(dir, &["rev-parse", "HEAD"])
}

pub struct Fixture {
    pub root: TempDir,
    pub name: String,
    pub seed: PathBuf,
    pub upstream: PathBuf,
    pub origin: PathBuf,
    pub work: PathBuf,
}

impl Fixture {
    pub fn new(name: &str) -> Self {
        let root = tempfile::tempdir().unwrap();
        let base = root.path();

        let seed = base.join("seed");
        std::fs::create_dir_all(&seed).unwrap();
        git(&seed, &["init", "-q", "-b", "main"]);
        identify(&seed);
        commit_file(&seed, "README.md", "# project\n", "initial");
        commit_file(&seed, "app.txt", "version = 1\n", "add app");

        let upstream = base.join("upstream.git");
        let origin = base.join("origin.git");
        git(base, &["clone", "-q", "--bare", "seed", "upstream.git"]);
        git(base, &["clone", "-q", "--bare", "seed", "origin.git"]);

        let work = base.join(name);
        git(base, &["clone", "-q", "origin.git", name]);
        identify(&work);

        Self {
            root,
            name: name.to_string(),
            seed,
            upstream,
            origin,
            work,
        }
    }

    /// Commit on upstream's main
    pub fn upstream_commit(&self, file: &str, contents: &str) -> String {
        let revision = commit_file(&self.seed, file, contents, "upstream change");
        git(&self.seed, &["push", "-q", self.upstream.to_str().unwrap(), "main"]);
        revision
    }

    /// Commit on the fork from another clone, leaving the working clone behind
    pub fn origin_commit(&self, file: &str, contents: &str) -> String {
        let other = self.root.path().join("other");
        if !other.exists() {
            git(self.root.path(), &["clone", "-q", "origin.git", "other"]);
            identify(&other);
        }
        let revision = commit_file(&other, file, contents, "fork change");
        git(&other, &["push", "-q", "origin", "main"]);
        revision
    }

    pub fn local_commit(&self, file: &str, contents: &str) -> String {
        commit_file(&self.work, file, contents, "local change")
    }

    pub fn head(&self) -> String {
        git(&self.work, &["rev-parse", "HEAD"])
    }

    pub fn branch(&self) -> String {
        git(&self.work, &["rev-parse", "--abbrev-ref", "HEAD"])
    }

    pub fn origin_head(&self) -> String {
        git(&self.origin, &["rev-parse", "main"])
    }

    pub fn read(&self, file: &str) -> String {
        std::fs::read_to_string(self.work.join(file)).unwrap()
    }

    pub fn project(&self) -> Project {
        Project {
            name: self.name.clone(),
            path: self.work.clone(),
            upstream_url: self.upstream.display().to_string(),
            origin_url: Some(self.origin.display().to_string()),
            branch: "main".to_string(),
            auto_stash: false,
            aliases: Vec::new(),
            hooks: Vec::new(),
            deployment: None,
            builtin: false,
        }
    }

    pub fn project_with_hooks(&self, hooks: Vec<Hook>) -> Project {
        Project {
            hooks,
            ..self.project()
        }
    }
}

/// Settings without waits between network retries
pub fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.timeouts.network_retry_count = 1;
    settings.timeouts.network_retry_delay_secs = 0;
    settings
}

pub fn state(home: &Path, settings: Settings, projects: Vec<Project>, shutdown: ShutdownSignal) -> Arc<AppState> {
    Arc::new(AppState::from_parts(
        StorageLayout::new(home),
        settings,
        Registry::from_projects(projects),
        shutdown,
    ))
}
