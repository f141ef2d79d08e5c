//! Merge-legality checks
//!
//! Checks are split the way the update cycle runs them: [`plan_checks`] is
//! pure and decides from review and branch metadata which problems are
//! already known and which git queries are still needed; [`perform`] runs
//! one [`GitCheck`] against the repository. Problems accumulate and block
//! acceptance; they never abort resolution.

use crate::approval::engine::Blocker;
use crate::error::Result;
use crate::fusion::merge::{Kind, Merge};
use crate::git::GitService;
use crate::types::{BranchInfo, Discussion, GitRef, ReviewState, Sha};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::debug;

/// Reason a review cannot be accepted
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case", tag = "problem", content = "branches")]
pub enum Problem {
    /// No proposition rule matches the source branch
    NoSourceRule,
    /// Source branch is protected
    SourceIsProtected,
    /// Target branch is not protected
    TargetNotProtected,
    /// Replication does not target the default branch
    TargetNotDefault,
    /// Bot-driven review was not opened by the bot
    NotBotMerge,
    /// Proposition was opened by the bot
    BotProposition,
    /// Branch the fork comes from is not protected
    OriginalNotProtected,
    /// Review target differs from the merge target
    ForkTargetMismatch,
    /// Fork is already merged into the target
    ForkInTarget,
    /// Fork is not on the branch it comes from
    ForkNotInOriginal,
    /// Review head does not contain the fork
    ForkNotInSource,
    /// Fork's parent is not merged into the target yet
    ForkParentNotInTarget,
    /// Review head does not replay the fork
    NotCherry,
    /// Ownage file is not owned by the sanity team
    Sanity,
    /// Review brings commits of protected branches not in the target
    ExtraCommits(BTreeSet<String>),
}

/// A check that needs the repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitCheck {
    /// Protected branches whose history leaks into the review
    ExtraCommits {
        /// Protected branch names
        branches: Vec<String>,
        /// Revisions the review may legitimately contain
        exclude: Vec<GitRef>,
        /// Review head
        head: Sha,
    },
    /// Head must replay the fork on top of the target
    NotCherry {
        /// Fork commit
        fork: Sha,
        /// Review head
        head: Sha,
        /// Target branch
        target: String,
    },
    /// Fork must not be merged yet
    ForkInTarget {
        /// Fork commit
        fork: Sha,
        /// Target branch
        target: String,
    },
    /// Fork must be on its original branch
    ForkNotInOriginal {
        /// Fork commit
        fork: Sha,
        /// Original branch
        original: String,
    },
    /// Head must contain the fork
    ForkNotInSource {
        /// Fork commit
        fork: Sha,
        /// Review head
        head: Sha,
    },
    /// Fork's parent must already be merged
    ForkParentNotInTarget {
        /// Fork commit
        fork: Sha,
        /// Target branch
        target: String,
    },
}

/// Facts the pure checks run against
#[derive(Debug, Clone, Copy)]
pub struct CheckInput<'a> {
    /// Review kind
    pub kind: &'a Kind,
    /// Current GitLab state
    pub review: &'a ReviewState,
    /// Review head
    pub head: &'a Sha,
    /// Every project branch
    pub branches: &'a [BranchInfo],
    /// Login of the bot account
    pub bot: &'a str,
}

fn branch<'a>(branches: &'a [BranchInfo], name: &str) -> Option<&'a BranchInfo> {
    branches.iter().find(|b| b.name == name)
}

/// Problems decidable from metadata, plus the git checks still to run
pub fn plan_checks(input: &CheckInput<'_>) -> (Vec<Problem>, Vec<GitCheck>) {
    let review = input.review;
    let mut problems = Vec::new();
    let mut checks = Vec::new();
    let protected = |name: &str| branch(input.branches, name).is_some_and(|b| b.protected);

    if protected(&review.source_branch) {
        problems.push(Problem::SourceIsProtected);
    }
    if !protected(&review.target_branch) {
        problems.push(Problem::TargetNotProtected);
    }
    let exclude = match input.kind {
        Kind::Proposition(rule) => {
            if rule.is_none() {
                problems.push(Problem::NoSourceRule);
            }
            if review.author.username == input.bot {
                problems.push(Problem::BotProposition);
            }
            vec![GitRef::Remote(review.target_branch.clone())]
        }
        Kind::Replication(merge) | Kind::Integration(merge) => {
            merge_problems(input, merge, &mut problems, &mut checks);
            vec![
                GitRef::Remote(merge.target.clone()),
                GitRef::Sha(merge.fork.clone()),
            ]
        }
    };
    let branches: Vec<String> = input
        .branches
        .iter()
        .filter(|b| b.protected)
        .map(|b| b.name.clone())
        .collect();
    if !branches.is_empty() {
        checks.push(GitCheck::ExtraCommits {
            branches,
            exclude,
            head: input.head.clone(),
        });
    }
    (problems, checks)
}

fn merge_problems(
    input: &CheckInput<'_>,
    merge: &Merge,
    problems: &mut Vec<Problem>,
    checks: &mut Vec<GitCheck>,
) {
    let review = input.review;
    let replication = matches!(input.kind, Kind::Replication(_));
    if review.author.username != input.bot {
        problems.push(Problem::NotBotMerge);
    }
    if review.target_branch != merge.target {
        problems.push(Problem::ForkTargetMismatch);
    }
    if replication && !branch(input.branches, &review.target_branch).is_some_and(|b| b.default) {
        problems.push(Problem::TargetNotDefault);
    }
    if !branch(input.branches, &merge.source).is_some_and(|b| b.protected) {
        problems.push(Problem::OriginalNotProtected);
    }
    checks.extend(stopper_checks(merge, replication));
    checks.push(GitCheck::ForkNotInSource {
        fork: merge.fork.clone(),
        head: input.head.clone(),
    });
    if replication {
        checks.push(GitCheck::NotCherry {
            fork: merge.fork.clone(),
            head: input.head.clone(),
            target: merge.target.clone(),
        });
    }
}

/// Checks guarding the creation of a bot-driven review
pub fn stopper_checks(merge: &Merge, replication: bool) -> Vec<GitCheck> {
    let mut checks = vec![
        GitCheck::ForkInTarget {
            fork: merge.fork.clone(),
            target: merge.target.clone(),
        },
        GitCheck::ForkNotInOriginal {
            fork: merge.fork.clone(),
            original: merge.source.clone(),
        },
    ];
    if replication {
        checks.push(GitCheck::ForkParentNotInTarget {
            fork: merge.fork.clone(),
            target: merge.target.clone(),
        });
    }
    checks
}

/// Run one git check
pub async fn perform(git: &dyn GitService, check: &GitCheck) -> Result<Vec<Problem>> {
    debug!(?check, "running git check");
    let mut problems = Vec::new();
    match check {
        GitCheck::ExtraCommits {
            branches,
            exclude,
            head,
        } => {
            let mut extras = BTreeSet::new();
            for name in branches {
                let remote = GitRef::Remote(name.clone());
                let Some(base) = git.merge_base(&remote, &GitRef::Sha(head.clone())).await? else {
                    continue;
                };
                let leaked = git.list_commits(&[GitRef::Sha(base)], exclude, false).await?;
                if !leaked.is_empty() {
                    extras.insert(name.clone());
                }
            }
            if !extras.is_empty() {
                problems.push(Problem::ExtraCommits(extras));
            }
        }
        GitCheck::NotCherry { fork, head, target } => {
            let contained = git
                .is_ancestor(&GitRef::FirstParent(head.clone()), &GitRef::Remote(target.clone()))
                .await?;
            let same = git.patch_id(head).await? == git.patch_id(fork).await?;
            if !contained || !same {
                problems.push(Problem::NotCherry);
            }
        }
        GitCheck::ForkInTarget { fork, target } => {
            if git
                .is_ancestor(&GitRef::Sha(fork.clone()), &GitRef::Remote(target.clone()))
                .await?
            {
                problems.push(Problem::ForkInTarget);
            }
        }
        GitCheck::ForkNotInOriginal { fork, original } => {
            if !git
                .is_ancestor(&GitRef::Sha(fork.clone()), &GitRef::Remote(original.clone()))
                .await?
            {
                problems.push(Problem::ForkNotInOriginal);
            }
        }
        GitCheck::ForkNotInSource { fork, head } => {
            if !git
                .is_ancestor(&GitRef::Sha(fork.clone()), &GitRef::Sha(head.clone()))
                .await?
            {
                problems.push(Problem::ForkNotInSource);
            }
        }
        GitCheck::ForkParentNotInTarget { fork, target } => {
            if !git
                .is_ancestor(&GitRef::FirstParent(fork.clone()), &GitRef::Remote(target.clone()))
                .await?
            {
                problems.push(Problem::ForkParentNotInTarget);
            }
        }
    }
    Ok(problems)
}

/// Run every check, collecting their problems
pub async fn perform_all(git: &dyn GitService, checks: &[GitCheck]) -> Result<Vec<Problem>> {
    let mut problems = Vec::new();
    for check in checks {
        problems.extend(perform(git, check).await?);
    }
    Ok(problems)
}

/// Conditions outside approvals that hold the merge
pub fn review_blockers(kind: &Kind, review: &ReviewState, discussions: &[Discussion]) -> Vec<Blocker> {
    let mut blockers = Vec::new();
    if review.draft {
        blockers.push(Blocker::Draft);
    }
    if review.work_in_progress {
        blockers.push(Blocker::WorkInProgress);
    }
    if !review.blocking_discussions_resolved || discussions.iter().any(Discussion::is_unresolved) {
        blockers.push(Blocker::Discussions);
    }
    if review.squash != kind.is_proposition() {
        blockers.push(Blocker::SquashStatus);
    }
    if let Kind::Proposition(Some(rule)) = kind {
        if rule.title.as_ref().is_some_and(|title| !title.is_met(&review.title)) {
            blockers.push(Blocker::BadTitle);
        }
    }
    blockers
}

/// Whether the head has the shape acceptance requires
///
/// A proposition must contain the target tip so GitLab can squash it
/// without conflicts. A bot-driven review must be exactly a merge of the
/// fork into the target tip.
pub async fn is_normalized(git: &dyn GitService, kind: &Kind, target: &str, head: &Sha) -> Result<bool> {
    let target_ref = GitRef::Remote(target.to_string());
    match kind.merge() {
        None => git.is_ancestor(&target_ref, &GitRef::Sha(head.clone())).await,
        Some(merge) => {
            let Some(tip) = git.resolve(&target_ref).await? else {
                return Ok(false);
            };
            let parents = git.list_parents(head).await?;
            Ok(parents == [tip, merge.fork.clone()])
        }
    }
}
