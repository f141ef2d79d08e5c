//! Real git repositories for end-to-end tests
//!
//! A bare `origin`, a `seed` clone the test commits in, and a `work` clone
//! the bot operates on through [`GitCli`].

#![allow(dead_code)]

use fusion_bot::git::GitCli;
use fusion_bot::types::Sha;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tempfile::TempDir;

pub struct TempRemote {
    _dir: TempDir,
    pub origin: PathBuf,
    pub seed: PathBuf,
    pub work: PathBuf,
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "Dave")
        .env("GIT_AUTHOR_EMAIL", "dave@example.com")
        .env("GIT_COMMITTER_NAME", "Dave")
        .env("GIT_COMMITTER_EMAIL", "dave@example.com")
        .output()
        .expect("git runs");
    assert!(
        output.status.success(),
        "git {args:?}: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

impl TempRemote {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let origin = dir.path().join("origin.git");
        let seed = dir.path().join("seed");
        let work = dir.path().join("work");
        git(dir.path(), &["init", "--bare", "-q", "-b", "main", origin.to_str().unwrap()]);
        for clone in [&seed, &work] {
            git(dir.path(), &["init", "-q", "-b", "main", clone.to_str().unwrap()]);
            git(clone, &["remote", "add", "origin", origin.to_str().unwrap()]);
        }
        Self {
            _dir: dir,
            origin,
            seed,
            work,
        }
    }

    /// Git client operating on the work clone
    pub fn cli(&self) -> GitCli {
        GitCli::new(&self.work, "origin", Duration::from_secs(30))
    }

    /// Switch the seed clone to `branch`, creating it from the current commit
    pub fn checkout(&self, branch: &str) {
        git(&self.seed, &["checkout", "-q", "-B", branch]);
    }

    /// Write files and commit them in the seed clone
    pub fn commit(&self, files: &[(&str, &str)], message: &str) -> Sha {
        for (path, content) in files {
            let full = self.seed.join(path);
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(full, content).unwrap();
            git(&self.seed, &["add", path]);
        }
        git(&self.seed, &["commit", "-q", "-m", message]);
        Sha::new(&git(&self.seed, &["rev-parse", "HEAD"])).unwrap()
    }

    /// Push the seed clone's `branch` to origin
    pub fn push(&self, branch: &str) {
        git(&self.seed, &["push", "-q", "--force", "origin", branch]);
    }

    /// Commit a branch's tip on origin, if it exists
    pub fn remote_tip(&self, branch: &str) -> Option<String> {
        let out = git(&self.origin, &["for-each-ref", "--format=%(objectname)", &format!("refs/heads/{branch}")]);
        (!out.is_empty()).then_some(out)
    }

    /// Content of a file on an origin branch
    pub fn remote_file(&self, branch: &str, path: &str) -> String {
        git(&self.origin, &["show", &format!("{branch}:{path}")])
    }

    /// Seed the storage branch with registered approvers
    pub fn seed_approvers(&self, logins: &[&str]) {
        let yaml: String = logins
            .iter()
            .map(|login| format!("{login}:\n  active: true\n"))
            .collect();
        git(&self.seed, &["checkout", "-q", "--orphan", "fusion-storage"]);
        git(&self.seed, &["rm", "-rfq", "--ignore-unmatch", "."]);
        self.commit(&[("approvers.yaml", &yaml)], "register approvers");
        self.push("fusion-storage");
        git(&self.seed, &["checkout", "-q", "-f", "main"]);
    }
}
