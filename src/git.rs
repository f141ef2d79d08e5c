//! Git command surface
//!
//! [`GitService`] is the seam the orchestrator talks to; [`GitCli`] runs the
//! `git` binary against a local clone. Every subprocess gets a deadline and
//! is killed when it expires, surfacing as the retryable [`Error::Timeout`].
//! Commits are built with plumbing commands and never touch the worktree.

use crate::error::{Error, Result};
use crate::types::{EMPTY_TREE, GitRef, Identity, Sha};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Git operations needed by the bot
#[async_trait]
pub trait GitService: Send + Sync {
    /// Update every remote-tracking branch
    async fn fetch(&self) -> Result<()>;

    /// Fetch one branch; `None` if the remote has no such branch
    async fn fetch_branch(&self, branch: &str) -> Result<Option<Sha>>;

    /// Commit a revision points at; `None` if it does not resolve
    async fn resolve(&self, rev: &GitRef) -> Result<Option<Sha>>;

    /// Whether `ancestor` is reachable from `descendant`
    async fn is_ancestor(&self, ancestor: &GitRef, descendant: &GitRef) -> Result<bool>;

    /// Best common ancestor; `None` for unrelated histories
    async fn merge_base(&self, a: &GitRef, b: &GitRef) -> Result<Option<Sha>>;

    /// Commits reachable from `include` but not from `exclude`, newest first
    ///
    /// Missing excluded revisions are ignored.
    async fn list_commits(
        &self,
        include: &[GitRef],
        exclude: &[GitRef],
        first_parent: bool,
    ) -> Result<Vec<Sha>>;

    /// Parents of a commit in order
    async fn list_parents(&self, sha: &Sha) -> Result<Vec<Sha>>;

    /// Paths differing between two tree-ish revisions
    async fn changed_files(&self, from: &GitRef, to: &GitRef) -> Result<Vec<String>>;

    /// Stable patch id of a commit against its first parent; `None` for empty patches
    async fn patch_id(&self, sha: &Sha) -> Result<Option<String>>;

    /// Author of a commit
    async fn author(&self, sha: &Sha) -> Result<Identity>;

    /// Tree of the automatic merge of two commits; `None` on conflicts
    async fn merge_tree(&self, ours: &GitRef, theirs: &GitRef) -> Result<Option<GitRef>>;

    /// Create a commit object without touching any ref
    async fn commit_tree(
        &self,
        tree: &GitRef,
        parents: &[GitRef],
        message: &str,
        author: &Identity,
    ) -> Result<Sha>;

    /// Content of a file at a revision; `None` if absent
    async fn show_file(&self, rev: &GitRef, path: &str) -> Result<Option<String>>;

    /// Create a commit replacing `files` in the tree of `parent`
    async fn commit_files(
        &self,
        parent: Option<&Sha>,
        files: &[(String, String)],
        message: &str,
        author: &Identity,
    ) -> Result<Sha>;

    /// Point a remote branch at `sha`
    async fn push(&self, branch: &str, sha: &Sha, force: bool) -> Result<()>;

    /// Remote the service works against
    fn remote(&self) -> &str;
}

/// [`GitService`] backed by the `git` binary
pub struct GitCli {
    repo: PathBuf,
    remote: String,
    timeout: Duration,
}

impl GitCli {
    /// Operate on the clone at `repo`
    pub fn new(repo: impl Into<PathBuf>, remote: &str, timeout: Duration) -> Self {
        Self {
            repo: repo.into(),
            remote: remote.to_string(),
            timeout,
        }
    }

    /// Path of the clone
    pub fn repo(&self) -> &Path {
        &self.repo
    }

    async fn output(&self, args: &[&str], env: &[(&str, &str)], stdin: Option<&str>) -> Result<Output> {
        debug!(args = ?args, "running git");
        let mut command = Command::new("git");
        command
            .args(args)
            .current_dir(&self.repo)
            .envs(env.iter().copied())
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command
            .spawn()
            .map_err(|e| Error::Git(format!("failed to run git: {e}")))?;
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await?;
            drop(pipe);
        }
        tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::Timeout(self.timeout.as_secs(), format!("git {}", args.join(" "))))?
            .map_err(Error::from)
    }

    async fn run_with(&self, args: &[&str], env: &[(&str, &str)], stdin: Option<&str>) -> Result<String> {
        let output = self.output(args, env, stdin).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Git(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        self.run_with(args, &[], None).await
    }

    /// Exit 0 is true, exit 1 is false, anything else is an error
    async fn check(&self, args: &[&str]) -> Result<bool> {
        let output = self.output(args, &[], None).await?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(Error::Git(format!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }

    fn rev(&self, rev: &GitRef) -> String {
        rev.rev(&self.remote)
    }

    fn lines(text: &str) -> impl Iterator<Item = &str> {
        text.lines().map(str::trim).filter(|l| !l.is_empty())
    }

    fn shas(text: &str) -> Result<Vec<Sha>> {
        Self::lines(text).map(Sha::new).collect()
    }

    fn author_env(author: &Identity) -> [(&'static str, &str); 4] {
        [
            ("GIT_AUTHOR_NAME", author.name.as_str()),
            ("GIT_AUTHOR_EMAIL", author.email.as_str()),
            ("GIT_COMMITTER_NAME", author.name.as_str()),
            ("GIT_COMMITTER_EMAIL", author.email.as_str()),
        ]
    }

    async fn index_path(&self) -> Result<PathBuf> {
        let path = PathBuf::from(self.run(&["rev-parse", "--git-path", "fusion.index"]).await?);
        Ok(if path.is_absolute() {
            path
        } else {
            self.repo.join(path)
        })
    }
}

#[async_trait]
impl GitService for GitCli {
    async fn fetch(&self) -> Result<()> {
        debug!(remote = %self.remote, "fetching");
        self.run(&["fetch", "--prune", "--no-tags", &self.remote]).await?;
        Ok(())
    }

    async fn fetch_branch(&self, branch: &str) -> Result<Option<Sha>> {
        debug!(remote = %self.remote, branch, "fetching branch");
        let heads = self
            .run(&["ls-remote", "--heads", &self.remote, &format!("refs/heads/{branch}")])
            .await?;
        if heads.is_empty() {
            return Ok(None);
        }
        let refspec = format!("+refs/heads/{branch}:refs/remotes/{}/{branch}", self.remote);
        self.run(&["fetch", "--no-tags", &self.remote, &refspec]).await?;
        self.resolve(&GitRef::Remote(branch.to_string())).await
    }

    async fn resolve(&self, rev: &GitRef) -> Result<Option<Sha>> {
        let spec = format!("{}^{{commit}}", self.rev(rev));
        let output = self
            .output(&["rev-parse", "--verify", "--quiet", &spec], &[], None)
            .await?;
        if !output.status.success() {
            return Ok(None);
        }
        Sha::new(&String::from_utf8_lossy(&output.stdout)).map(Some)
    }

    async fn is_ancestor(&self, ancestor: &GitRef, descendant: &GitRef) -> Result<bool> {
        self.check(&[
            "merge-base",
            "--is-ancestor",
            &self.rev(ancestor),
            &self.rev(descendant),
        ])
        .await
    }

    async fn merge_base(&self, a: &GitRef, b: &GitRef) -> Result<Option<Sha>> {
        let output = self
            .output(&["merge-base", &self.rev(a), &self.rev(b)], &[], None)
            .await?;
        match output.status.code() {
            Some(0) => Sha::new(&String::from_utf8_lossy(&output.stdout)).map(Some),
            Some(1) => Ok(None),
            _ => Err(Error::Git(format!(
                "git merge-base failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }

    async fn list_commits(
        &self,
        include: &[GitRef],
        exclude: &[GitRef],
        first_parent: bool,
    ) -> Result<Vec<Sha>> {
        let mut args = vec!["rev-list".to_string()];
        if first_parent {
            args.push("--first-parent".to_string());
        }
        args.extend(include.iter().map(|r| self.rev(r)));
        for rev in exclude {
            if self.resolve(rev).await?.is_some() {
                args.push(format!("^{}", self.rev(rev)));
            }
        }
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        Self::shas(&self.run(&args).await?)
    }

    async fn list_parents(&self, sha: &Sha) -> Result<Vec<Sha>> {
        let line = self
            .run(&["rev-list", "--parents", "-n", "1", sha.as_str()])
            .await?;
        Self::shas(&line).map(|shas| shas.into_iter().skip(1).collect())
    }

    async fn changed_files(&self, from: &GitRef, to: &GitRef) -> Result<Vec<String>> {
        let text = self
            .run(&["diff", "--name-only", "--no-renames", &self.rev(from), &self.rev(to)])
            .await?;
        Ok(Self::lines(&text).map(ToString::to_string).collect())
    }

    async fn patch_id(&self, sha: &Sha) -> Result<Option<String>> {
        let base = match self.list_parents(sha).await?.into_iter().next() {
            Some(parent) => parent.to_string(),
            None => EMPTY_TREE.to_string(),
        };
        let patch = self.run(&["diff", &base, sha.as_str()]).await?;
        if patch.is_empty() {
            return Ok(None);
        }
        let id = self
            .run_with(&["patch-id", "--stable"], &[], Some(&format!("{patch}\n")))
            .await?;
        Ok(id.split_whitespace().next().map(ToString::to_string))
    }

    async fn author(&self, sha: &Sha) -> Result<Identity> {
        let text = self
            .run(&["show", "-s", "--format=%an%n%ae", sha.as_str()])
            .await?;
        let mut lines = text.lines();
        match (lines.next(), lines.next()) {
            (Some(name), Some(email)) => Ok(Identity {
                name: name.to_string(),
                email: email.to_string(),
            }),
            _ => Err(Error::Git(format!("no author for {sha}"))),
        }
    }

    async fn merge_tree(&self, ours: &GitRef, theirs: &GitRef) -> Result<Option<GitRef>> {
        let output = self
            .output(
                &["merge-tree", "--write-tree", &self.rev(ours), &self.rev(theirs)],
                &[],
                None,
            )
            .await?;
        match output.status.code() {
            Some(0) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let tree = stdout.lines().next().unwrap_or_default().trim().to_string();
                Ok(Some(GitRef::Tree(tree)))
            }
            Some(1) => Ok(None),
            _ => Err(Error::Git(format!(
                "git merge-tree failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }

    async fn commit_tree(
        &self,
        tree: &GitRef,
        parents: &[GitRef],
        message: &str,
        author: &Identity,
    ) -> Result<Sha> {
        let mut args = vec![
            "commit-tree".to_string(),
            format!("{}^{{tree}}", self.rev(tree)),
        ];
        for parent in parents {
            args.push("-p".to_string());
            args.push(self.rev(parent));
        }
        args.push("-m".to_string());
        args.push(message.to_string());
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let sha = self.run_with(&args, &Self::author_env(author), None).await?;
        Sha::new(&sha)
    }

    async fn show_file(&self, rev: &GitRef, path: &str) -> Result<Option<String>> {
        let spec = format!("{}:{path}", self.rev(rev));
        if !self.check(&["cat-file", "-e", &spec]).await.unwrap_or(false) {
            return Ok(None);
        }
        let output = self.output(&["show", &spec], &[], None).await?;
        if !output.status.success() {
            return Err(Error::Git(format!(
                "git show {spec} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
    }

    async fn commit_files(
        &self,
        parent: Option<&Sha>,
        files: &[(String, String)],
        message: &str,
        author: &Identity,
    ) -> Result<Sha> {
        let index = self.index_path().await?;
        let _ = std::fs::remove_file(&index);
        let index_str = index.to_string_lossy().into_owned();
        let env = [("GIT_INDEX_FILE", index_str.as_str())];
        if let Some(parent) = parent {
            self.run_with(&["read-tree", parent.as_str()], &env, None).await?;
        }
        for (path, content) in files {
            let blob = self
                .run_with(&["hash-object", "-w", "--stdin"], &[], Some(content))
                .await?;
            let info = format!("100644,{blob},{path}");
            self.run_with(&["update-index", "--add", "--cacheinfo", &info], &env, None)
                .await?;
        }
        let tree = self.run_with(&["write-tree"], &env, None).await?;
        let _ = std::fs::remove_file(&index);
        let parents: Vec<GitRef> = parent.map(GitRef::from).into_iter().collect();
        self.commit_tree(&GitRef::Tree(tree), &parents, message, author)
            .await
    }

    async fn push(&self, branch: &str, sha: &Sha, force: bool) -> Result<()> {
        debug!(branch, sha = %sha, force, "pushing");
        let refspec = format!("{sha}:refs/heads/{branch}");
        let mut args = vec!["push", "--porcelain"];
        if force {
            args.push("--force");
        }
        args.push(&self.remote);
        args.push(&refspec);
        self.run(&args).await?;
        Ok(())
    }

    fn remote(&self) -> &str {
        &self.remote
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn run_git(dir: &Path, args: &[&str]) -> String {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    fn commit(dir: &Path, file: &str, content: &str, message: &str) -> Sha {
        std::fs::write(dir.join(file), content).unwrap();
        run_git(dir, &["add", file]);
        run_git(dir, &["commit", "-q", "-m", message]);
        Sha::new(&run_git(dir, &["rev-parse", "HEAD"])).unwrap()
    }

    fn make_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init", "-q", "-b", "main"]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        dir
    }

    fn cli(dir: &Path) -> GitCli {
        GitCli::new(dir, "origin", Duration::from_secs(30))
    }

    fn identity() -> Identity {
        Identity {
            name: "Fusion".to_string(),
            email: "fusion@example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn test_ancestry_and_commits() {
        let repo = make_repo();
        let first = commit(repo.path(), "a.txt", "a", "first");
        let second = commit(repo.path(), "b.txt", "b", "second");
        let git = cli(repo.path());
        assert!(git.is_ancestor(&(&first).into(), &(&second).into()).await.unwrap());
        assert!(!git.is_ancestor(&(&second).into(), &(&first).into()).await.unwrap());
        let commits = git
            .list_commits(&[(&second).into()], &[(&first).into()], false)
            .await
            .unwrap();
        assert_eq!(commits, vec![second.clone()]);
        assert_eq!(git.list_parents(&second).await.unwrap(), vec![first.clone()]);
        let files = git
            .changed_files(&GitRef::FirstParent(second.clone()), &(&second).into())
            .await
            .unwrap();
        assert_eq!(files, vec!["b.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_exclude_is_ignored() {
        let repo = make_repo();
        let head = commit(repo.path(), "a.txt", "a", "first");
        let git = cli(repo.path());
        let commits = git
            .list_commits(&[(&head).into()], &[GitRef::Remote("gone".to_string())], false)
            .await
            .unwrap();
        assert_eq!(commits, vec![head]);
    }

    #[tokio::test]
    async fn test_commit_files_keeps_other_paths() {
        let repo = make_repo();
        let base = commit(repo.path(), "keep.yaml", "keep: true\n", "base");
        let git = cli(repo.path());
        let files = vec![("queue.yaml".to_string(), "{}\n".to_string())];
        let sha = git
            .commit_files(Some(&base), &files, "fusion: enqueue", &identity())
            .await
            .unwrap();
        assert_eq!(git.list_parents(&sha).await.unwrap(), vec![base]);
        let rev = GitRef::Sha(sha);
        assert_eq!(git.show_file(&rev, "queue.yaml").await.unwrap().as_deref(), Some("{}\n"));
        assert!(git.show_file(&rev, "keep.yaml").await.unwrap().is_some());
        assert!(git.show_file(&rev, "absent.yaml").await.unwrap().is_none());
        assert_eq!(git.author(&sha_of(&rev)).await.unwrap().name, "Fusion");
    }

    fn sha_of(rev: &GitRef) -> Sha {
        match rev {
            GitRef::Sha(sha) => sha.clone(),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_patch_id_matches_cherry_pick() {
        let repo = make_repo();
        let base = commit(repo.path(), "a.txt", "a\n", "base");
        run_git(repo.path(), &["checkout", "-q", "-b", "side"]);
        let pick = commit(repo.path(), "b.txt", "b\n", "pick");
        run_git(repo.path(), &["checkout", "-q", "main"]);
        commit(repo.path(), "c.txt", "c\n", "other");
        run_git(repo.path(), &["cherry-pick", pick.as_str()]);
        let picked = Sha::new(&run_git(repo.path(), &["rev-parse", "HEAD"])).unwrap();
        let git = cli(repo.path());
        assert_ne!(pick, picked);
        assert_eq!(git.patch_id(&pick).await.unwrap(), git.patch_id(&picked).await.unwrap());
        assert_ne!(git.patch_id(&base).await.unwrap(), git.patch_id(&pick).await.unwrap());
    }

    #[tokio::test]
    async fn test_merge_tree_detects_conflicts() {
        let repo = make_repo();
        commit(repo.path(), "a.txt", "base\n", "base");
        run_git(repo.path(), &["checkout", "-q", "-b", "side"]);
        let side = commit(repo.path(), "a.txt", "side\n", "side");
        run_git(repo.path(), &["checkout", "-q", "main"]);
        let main = commit(repo.path(), "a.txt", "main\n", "main");
        let clean = commit(repo.path(), "b.txt", "b\n", "clean");
        let git = cli(repo.path());
        assert!(git.merge_tree(&(&main).into(), &(&side).into()).await.unwrap().is_none());
        let tree = git.merge_tree(&(&main).into(), &(&clean).into()).await.unwrap();
        assert!(matches!(tree, Some(GitRef::Tree(_))));
    }
}
