//! Which files a review or a single commit changes
//!
//! Merge commits are judged by what they add on top of the automatic
//! merge of their parents, so a clean merge changes nothing.

use crate::error::Result;
use crate::fusion::merge::Kind;
use crate::git::GitService;
use crate::types::{EMPTY_TREE, GitRef, Sha};
use std::collections::BTreeSet;

/// Files `head` changes relative to merging `parents` automatically
///
/// When the parents conflict, only files every parent disagrees on count.
pub async fn merge_changes(git: &dyn GitService, parents: &[GitRef], head: &Sha) -> Result<Vec<String>> {
    let head = GitRef::Sha(head.clone());
    if let [ours, theirs] = parents {
        if let Some(tree) = git.merge_tree(ours, theirs).await? {
            return git.changed_files(&tree, &head).await;
        }
    }
    let mut common: Option<BTreeSet<String>> = None;
    for parent in parents {
        let files: BTreeSet<String> = git.changed_files(parent, &head).await?.into_iter().collect();
        common = Some(match common {
            None => files,
            Some(seen) => seen.intersection(&files).cloned().collect(),
        });
    }
    Ok(common.unwrap_or_default().into_iter().collect())
}

/// Files one commit changes
pub async fn commit_changes(git: &dyn GitService, sha: &Sha) -> Result<Vec<String>> {
    let parents = git.list_parents(sha).await?;
    match parents.as_slice() {
        [] => {
            git.changed_files(&GitRef::Tree(EMPTY_TREE.to_string()), &GitRef::Sha(sha.clone()))
                .await
        }
        [parent] => {
            git.changed_files(&GitRef::Sha(parent.clone()), &GitRef::Sha(sha.clone()))
                .await
        }
        _ => {
            let parents: Vec<GitRef> = parents.into_iter().map(GitRef::Sha).collect();
            merge_changes(git, &parents, sha).await
        }
    }
}

/// Files the whole review changes
///
/// A proposition brings everything since it forked from the target. A
/// replication or integration only answers for what differs from the
/// automatic merge of its fork.
pub async fn review_changes(git: &dyn GitService, kind: &Kind, target: &str, head: &Sha) -> Result<Vec<String>> {
    let target = GitRef::Remote(target.to_string());
    match kind.merge() {
        None => {
            let base = git
                .merge_base(&target, &GitRef::Sha(head.clone()))
                .await?
                .map_or(GitRef::Tree(EMPTY_TREE.to_string()), GitRef::Sha);
            git.changed_files(&base, &GitRef::Sha(head.clone())).await
        }
        Some(merge) => merge_changes(git, &[target, GitRef::Sha(merge.fork.clone())], head).await,
    }
}

/// Review commits not yet on the target, newest first
pub async fn review_commits(git: &dyn GitService, kind: &Kind, target: &str, head: &Sha) -> Result<Vec<Sha>> {
    git.list_commits(&[GitRef::Sha(head.clone())], &exclusions(kind, target, None), false)
        .await
}

/// Review commits following an approved commit
pub async fn child_commits(
    git: &dyn GitService,
    kind: &Kind,
    target: &str,
    approved: &Sha,
    head: &Sha,
) -> Result<Vec<Sha>> {
    git.list_commits(
        &[GitRef::Sha(head.clone())],
        &exclusions(kind, target, Some(approved)),
        false,
    )
    .await
}

fn exclusions(kind: &Kind, target: &str, approved: Option<&Sha>) -> Vec<GitRef> {
    std::iter::once(GitRef::Remote(target.to_string()))
        .chain(approved.map(GitRef::from))
        .chain(kind.merge().map(|merge| GitRef::from(&merge.fork)))
        .collect()
}
