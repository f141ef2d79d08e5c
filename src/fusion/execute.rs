//! Update execution - effectful operations
//!
//! Takes an `UpdatePlan` (created by the pure planning functions) and
//! applies it through GitLab, git and the in-memory queue. Execution stops
//! once a step makes the remaining ones pointless: the review is not first
//! in its queue, or the head was rewritten and a new pipeline will run.

use crate::approval::status::ApprovalStatus;
use crate::error::{Error, Result};
use crate::fusion::merge::Kind;
use crate::fusion::plan::{UpdatePlan, UpdateStep};
use crate::fusion::queue::Queue;
use crate::git::GitService;
use crate::platform::PlatformService;
use crate::types::{GitRef, MergeParams, MergeResult, ReviewState, Sha};
use tracing::{debug, info, warn};

/// Review-specific inputs of an execution
pub struct UpdateTarget<'a> {
    /// Review kind
    pub kind: &'a Kind,
    /// Current GitLab state
    pub review: &'a ReviewState,
    /// Head the resolution ran against
    pub head: &'a Sha,
}

/// Result of update execution
#[derive(Debug, Clone, Default)]
pub struct UpdateExecution {
    /// Whether the review heads its queue
    pub first: bool,
    /// Commit pushed by normalization
    pub pushed: Option<Sha>,
    /// Whether normalization hit merge conflicts
    pub conflicts: bool,
    /// GitLab's answer to the merge call
    pub merge: Option<MergeResult>,
}

impl UpdateExecution {
    /// Whether GitLab merged the review
    #[must_use]
    pub fn is_merged(&self) -> bool {
        self.merge.as_ref().is_some_and(|m| m.merged)
    }
}

/// Execute the update plan (EFFECTFUL)
pub async fn execute_update(
    plan: &UpdatePlan,
    target: &UpdateTarget<'_>,
    status: &mut ApprovalStatus,
    queue: &mut Queue,
    git: &dyn GitService,
    platform: &dyn PlatformService,
) -> Result<UpdateExecution> {
    let review = target.review;
    let mut result = UpdateExecution::default();

    for step in &plan.steps {
        debug!(review = review.iid, %step, "executing step");
        match step {
            UpdateStep::SetLabels { add, remove } => {
                platform.update_labels(review.iid, add, remove).await?;
            }
            UpdateStep::PostAward(name) => {
                platform.post_award(review.iid, name).await?;
            }
            UpdateStep::Enqueue => {
                result.first = queue.enqueue(review.iid, Some(&review.target_branch));
                if !result.first {
                    debug!(review = review.iid, "waiting in queue");
                    break;
                }
            }
            UpdateStep::Dequeue => {
                queue.dequeue(review.iid);
            }
            UpdateStep::Normalize => {
                match normalize(target, status, git).await? {
                    Some(sha) => result.pushed = Some(sha),
                    None => result.conflicts = true,
                }
                break;
            }
            UpdateStep::Merge => {
                let params = MergeParams {
                    squash: target.kind.is_proposition(),
                    commit_message: target.kind.commit_message(review),
                    sha: target.head.clone(),
                    should_remove_source_branch: true,
                };
                let merge = platform.merge_review(review.iid, &params).await?;
                if merge.merged {
                    info!(review = review.iid, sha = ?merge.sha, "merged");
                } else {
                    warn!(review = review.iid, message = ?merge.message, "merge refused");
                }
                result.merge = Some(merge);
            }
        }
    }

    Ok(result)
}

/// Rewrite the head into mergeable shape and push it
///
/// Returns the pushed commit, or `None` when the target cannot be merged
/// in automatically.
async fn normalize(
    target: &UpdateTarget<'_>,
    status: &mut ApprovalStatus,
    git: &dyn GitService,
) -> Result<Option<Sha>> {
    let review = target.review;
    let head = GitRef::Sha(target.head.clone());
    let target_ref = GitRef::Remote(review.target_branch.clone());
    match target.kind {
        Kind::Proposition(_) => {
            let Some(tree) = git.merge_tree(&head, &target_ref).await? else {
                info!(review = review.iid, "target does not merge cleanly");
                return Ok(None);
            };
            let author = git.author(target.head).await?;
            let message = format!(
                "Merge branch '{}' into {}",
                review.target_branch, review.source_branch
            );
            let sha = git
                .commit_tree(&tree, &[head, target_ref], &message, &author)
                .await?;
            git.push(&review.source_branch, &sha, false).await?;
            info!(review = review.iid, sha = %sha, "merged target into source");
            Ok(Some(sha))
        }
        Kind::Replication(merge) | Kind::Integration(merge) => {
            let tip = git
                .resolve(&target_ref)
                .await?
                .ok_or_else(|| Error::Git(format!("target {} not fetched", merge.target)))?;
            let author = git.author(&merge.fork).await?;
            let message = Kind::title(merge, matches!(target.kind, Kind::Replication(_)));
            let sha = git
                .commit_tree(
                    &head,
                    &[GitRef::Sha(tip), GitRef::Sha(merge.fork.clone())],
                    &message,
                    &author,
                )
                .await?;
            git.push(&merge.supply, &sha, true).await?;
            status.squash_approves(&sha);
            info!(review = review.iid, sha = %sha, "rebuilt merge commit");
            Ok(Some(sha))
        }
    }
}
