//! Scripted git service for testing
//!
//! Answers come from maps keyed by rendered revisions, so tests describe a
//! history without creating commits. Unscripted queries return empty
//! answers.

#![allow(dead_code)]

use async_trait::async_trait;
use fusion_bot::error::{Error, Result};
use fusion_bot::git::GitService;
use fusion_bot::types::{GitRef, Identity, Sha};
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

const REMOTE: &str = "origin";

fn key(rev: &GitRef) -> String {
    rev.rev(REMOTE)
}

/// Fixed sha made of one repeated hex digit
pub fn sha(c: char) -> Sha {
    Sha::new(&c.to_string().repeat(40)).unwrap()
}

#[derive(Default)]
pub struct MockGit {
    resolves: Mutex<HashMap<String, Sha>>,
    ancestors: Mutex<BTreeSet<(String, String)>>,
    merge_bases: Mutex<HashMap<(String, String), Sha>>,
    commits: Mutex<HashMap<String, Vec<Sha>>>,
    parents: Mutex<HashMap<String, Vec<Sha>>>,
    diffs: Mutex<HashMap<(String, String), Vec<String>>>,
    merge_trees: Mutex<HashMap<(String, String), Option<String>>>,
    patch_ids: Mutex<HashMap<String, String>>,
    // Call tracking
    changed_files_calls: Mutex<Vec<(String, String)>>,
    push_calls: Mutex<Vec<(String, Sha, bool)>>,
    // Error injection
    error_on_fetch: Mutex<Option<String>>,
}

impl MockGit {
    pub fn new() -> Self {
        Self::default()
    }

    // === Setup ===

    pub fn set_resolve(&self, rev: &GitRef, sha: Sha) {
        self.resolves.lock().unwrap().insert(key(rev), sha);
    }

    pub fn set_ancestor(&self, ancestor: &GitRef, descendant: &GitRef) {
        self.ancestors
            .lock()
            .unwrap()
            .insert((key(ancestor), key(descendant)));
    }

    pub fn set_merge_base(&self, a: &GitRef, b: &GitRef, base: Sha) {
        self.merge_bases
            .lock()
            .unwrap()
            .insert((key(a), key(b)), base);
    }

    /// Commits `list_commits` returns for an include revision
    pub fn set_commits(&self, include: &GitRef, commits: Vec<Sha>) {
        self.commits.lock().unwrap().insert(key(include), commits);
    }

    pub fn set_parents(&self, sha: &Sha, parents: Vec<Sha>) {
        self.parents
            .lock()
            .unwrap()
            .insert(sha.to_string(), parents);
    }

    pub fn set_diff(&self, from: &GitRef, to: &GitRef, files: &[&str]) {
        self.diffs.lock().unwrap().insert(
            (key(from), key(to)),
            files.iter().map(ToString::to_string).collect(),
        );
    }

    /// Tree of an automatic merge; `None` scripts a conflict
    pub fn set_merge_tree(&self, ours: &GitRef, theirs: &GitRef, tree: Option<&str>) {
        self.merge_trees
            .lock()
            .unwrap()
            .insert((key(ours), key(theirs)), tree.map(ToString::to_string));
    }

    pub fn set_patch_id(&self, sha: &Sha, id: &str) {
        self.patch_ids
            .lock()
            .unwrap()
            .insert(sha.to_string(), id.to_string());
    }

    pub fn fail_fetch(&self, msg: &str) {
        *self.error_on_fetch.lock().unwrap() = Some(msg.to_string());
    }

    // === Call inspection ===

    pub fn changed_files_calls(&self) -> Vec<(String, String)> {
        self.changed_files_calls.lock().unwrap().clone()
    }

    pub fn push_calls(&self) -> Vec<(String, Sha, bool)> {
        self.push_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GitService for MockGit {
    async fn fetch(&self) -> Result<()> {
        if let Some(msg) = self.error_on_fetch.lock().unwrap().as_ref() {
            return Err(Error::Git(msg.clone()));
        }
        Ok(())
    }

    async fn fetch_branch(&self, branch: &str) -> Result<Option<Sha>> {
        self.fetch().await?;
        self.resolve(&GitRef::Remote(branch.to_string())).await
    }

    async fn resolve(&self, rev: &GitRef) -> Result<Option<Sha>> {
        if let GitRef::Sha(sha) = rev {
            return Ok(Some(sha.clone()));
        }
        Ok(self.resolves.lock().unwrap().get(&key(rev)).cloned())
    }

    async fn is_ancestor(&self, ancestor: &GitRef, descendant: &GitRef) -> Result<bool> {
        let pair = (key(ancestor), key(descendant));
        Ok(pair.0 == pair.1 || self.ancestors.lock().unwrap().contains(&pair))
    }

    async fn merge_base(&self, a: &GitRef, b: &GitRef) -> Result<Option<Sha>> {
        Ok(self
            .merge_bases
            .lock()
            .unwrap()
            .get(&(key(a), key(b)))
            .cloned())
    }

    async fn list_commits(
        &self,
        include: &[GitRef],
        exclude: &[GitRef],
        _first_parent: bool,
    ) -> Result<Vec<Sha>> {
        let commits = self.commits.lock().unwrap();
        let excluded: BTreeSet<Sha> = exclude
            .iter()
            .filter_map(|rev| match rev {
                GitRef::Sha(sha) => Some(sha.clone()),
                _ => None,
            })
            .collect();
        Ok(include
            .iter()
            .filter_map(|rev| commits.get(&key(rev)))
            .flatten()
            .filter(|sha| !excluded.contains(*sha))
            .cloned()
            .collect())
    }

    async fn list_parents(&self, sha: &Sha) -> Result<Vec<Sha>> {
        Ok(self
            .parents
            .lock()
            .unwrap()
            .get(sha.as_str())
            .cloned()
            .unwrap_or_default())
    }

    async fn changed_files(&self, from: &GitRef, to: &GitRef) -> Result<Vec<String>> {
        let pair = (key(from), key(to));
        self.changed_files_calls.lock().unwrap().push(pair.clone());
        Ok(self
            .diffs
            .lock()
            .unwrap()
            .get(&pair)
            .cloned()
            .unwrap_or_default())
    }

    async fn patch_id(&self, sha: &Sha) -> Result<Option<String>> {
        Ok(self.patch_ids.lock().unwrap().get(sha.as_str()).cloned())
    }

    async fn author(&self, _sha: &Sha) -> Result<Identity> {
        Ok(Identity {
            name: "Dave".to_string(),
            email: "dave@example.com".to_string(),
        })
    }

    async fn merge_tree(&self, ours: &GitRef, theirs: &GitRef) -> Result<Option<GitRef>> {
        let pair = (key(ours), key(theirs));
        Ok(self
            .merge_trees
            .lock()
            .unwrap()
            .get(&pair)
            .cloned()
            .flatten()
            .map(GitRef::Tree))
    }

    async fn commit_tree(
        &self,
        _tree: &GitRef,
        _parents: &[GitRef],
        _message: &str,
        _author: &Identity,
    ) -> Result<Sha> {
        Ok(sha('f'))
    }

    async fn show_file(&self, _rev: &GitRef, _path: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn commit_files(
        &self,
        _parent: Option<&Sha>,
        _files: &[(String, String)],
        _message: &str,
        _author: &Identity,
    ) -> Result<Sha> {
        Ok(sha('e'))
    }

    async fn push(&self, branch: &str, sha: &Sha, force: bool) -> Result<()> {
        self.push_calls
            .lock()
            .unwrap()
            .push((branch.to_string(), sha.clone(), force));
        Ok(())
    }

    fn remote(&self) -> &str {
        REMOTE
    }
}
