//! Merge request hosting service
//!
//! The bot is opinionated about GitLab's merge request shape, so the trait
//! speaks in GitLab terms. [`GitLabService`] is the HTTP implementation;
//! tests substitute an in-memory mock.

mod gitlab;

pub use gitlab::GitLabService;

use crate::error::Result;
use crate::types::{
    Award, BranchInfo, CommitReview, Discussion, Job, MergeParams, MergeResult, ReviewState,
};
use async_trait::async_trait;
use std::collections::BTreeSet;

/// Merge request operations used by the bot
#[async_trait]
pub trait PlatformService: Send + Sync {
    /// Current state of a merge request
    async fn get_review(&self, iid: u64) -> Result<ReviewState>;

    /// Award emoji on a merge request
    async fn list_awards(&self, iid: u64) -> Result<Vec<Award>>;

    /// Discussions on a merge request
    async fn list_discussions(&self, iid: u64) -> Result<Vec<Discussion>>;

    /// Every branch of the project
    async fn list_branches(&self) -> Result<Vec<BranchInfo>>;

    /// One branch; `None` if it does not exist
    async fn get_branch(&self, name: &str) -> Result<Option<BranchInfo>>;

    /// A CI job, used to identify who triggered an operation
    async fn get_job(&self, id: u64) -> Result<Job>;

    /// Merge requests containing a commit
    async fn list_commit_reviews(&self, sha: &str) -> Result<Vec<CommitReview>>;

    /// Add and remove labels in one call
    async fn update_labels(
        &self,
        iid: u64,
        add: &BTreeSet<String>,
        remove: &BTreeSet<String>,
    ) -> Result<()>;

    /// Award an emoji as the bot
    async fn post_award(&self, iid: u64, name: &str) -> Result<()>;

    /// Start a new merge request pipeline
    async fn trigger_pipeline(&self, iid: u64) -> Result<()>;

    /// Accept a merge request
    ///
    /// A refusal by GitLab (not mergeable, sha moved) is a result with
    /// `merged == false` and the reason in `message`, not an error.
    async fn merge_review(&self, iid: u64, params: &MergeParams) -> Result<MergeResult>;

    /// Open a merge request that merges without squashing
    async fn create_review(&self, source: &str, target: &str, title: &str) -> Result<ReviewState>;
}
