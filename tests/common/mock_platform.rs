//! Mock GitLab service for testing
//!
//! These are test utilities - not all may be used in current tests but are
//! available for future test development.

#![allow(dead_code)]

use async_trait::async_trait;
use fusion_bot::error::{Error, Result};
use fusion_bot::platform::PlatformService;
use fusion_bot::types::{
    Award, BranchInfo, CommitReview, Discussion, Job, MergeParams, MergeResult, Pipeline,
    ReviewState, ReviewStatus, User,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Call record for `update_labels`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelsCall {
    pub iid: u64,
    pub add: BTreeSet<String>,
    pub remove: BTreeSet<String>,
}

/// Call record for `merge_review`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeCall {
    pub iid: u64,
    pub params: MergeParams,
}

/// Call record for `create_review`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateReviewCall {
    pub source: String,
    pub target: String,
    pub title: String,
}

/// In-memory GitLab project
///
/// Features:
/// - Reviews, branches and jobs served from maps
/// - Auto-incrementing merge request iids
/// - Call tracking for verification
/// - Error injection for failure path testing
pub struct MockGitLab {
    bot: String,
    next_iid: AtomicU64,
    reviews: Mutex<HashMap<u64, ReviewState>>,
    branches: Mutex<Vec<BranchInfo>>,
    jobs: Mutex<HashMap<u64, Job>>,
    awards: Mutex<HashMap<u64, Vec<Award>>>,
    discussions: Mutex<HashMap<u64, Vec<Discussion>>>,
    commit_reviews: Mutex<HashMap<String, Vec<CommitReview>>>,
    merge_refusal: Mutex<Option<String>>,
    // Call tracking
    get_review_calls: Mutex<Vec<u64>>,
    labels_calls: Mutex<Vec<LabelsCall>>,
    award_calls: Mutex<Vec<(u64, String)>>,
    trigger_calls: Mutex<Vec<u64>>,
    merge_calls: Mutex<Vec<MergeCall>>,
    create_review_calls: Mutex<Vec<CreateReviewCall>>,
    // Error injection
    error_on_get_review: Mutex<Option<String>>,
    error_on_merge: Mutex<Option<String>>,
}

impl MockGitLab {
    /// Create an empty project administered by `bot`
    pub fn new(bot: &str) -> Self {
        Self {
            bot: bot.to_string(),
            next_iid: AtomicU64::new(100),
            reviews: Mutex::new(HashMap::new()),
            branches: Mutex::new(Vec::new()),
            jobs: Mutex::new(HashMap::new()),
            awards: Mutex::new(HashMap::new()),
            discussions: Mutex::new(HashMap::new()),
            commit_reviews: Mutex::new(HashMap::new()),
            merge_refusal: Mutex::new(None),
            get_review_calls: Mutex::new(Vec::new()),
            labels_calls: Mutex::new(Vec::new()),
            award_calls: Mutex::new(Vec::new()),
            trigger_calls: Mutex::new(Vec::new()),
            merge_calls: Mutex::new(Vec::new()),
            create_review_calls: Mutex::new(Vec::new()),
            error_on_get_review: Mutex::new(None),
            error_on_merge: Mutex::new(None),
        }
    }

    // === Setup ===

    /// Add or replace a review
    pub fn set_review(&self, review: ReviewState) {
        self.reviews.lock().unwrap().insert(review.iid, review);
    }

    /// Edit a stored review in place
    pub fn update_review(&self, iid: u64, edit: impl FnOnce(&mut ReviewState)) {
        let mut reviews = self.reviews.lock().unwrap();
        edit(reviews.get_mut(&iid).expect("review exists"));
    }

    /// Add a branch
    pub fn add_branch(&self, name: &str, protected: bool, default: bool) {
        self.branches.lock().unwrap().push(BranchInfo {
            name: name.to_string(),
            protected,
            default,
        });
    }

    /// Register a job run by `user` in `pipeline`
    pub fn add_job(&self, id: u64, user: &str, pipeline: Pipeline) {
        self.jobs.lock().unwrap().insert(
            id,
            Job {
                id,
                user: User {
                    username: user.to_string(),
                },
                pipeline,
            },
        );
    }

    /// Attach discussions to a review
    pub fn set_discussions(&self, iid: u64, discussions: Vec<Discussion>) {
        self.discussions.lock().unwrap().insert(iid, discussions);
    }

    /// Merge requests a commit was squashed from
    pub fn set_commit_reviews(&self, sha: &str, reviews: Vec<CommitReview>) {
        self.commit_reviews
            .lock()
            .unwrap()
            .insert(sha.to_string(), reviews);
    }

    /// Make GitLab refuse merges with a message
    pub fn refuse_merge(&self, message: &str) {
        *self.merge_refusal.lock().unwrap() = Some(message.to_string());
    }

    // === Error injection ===

    /// Make `get_review` return an error
    pub fn fail_get_review(&self, msg: &str) {
        *self.error_on_get_review.lock().unwrap() = Some(msg.to_string());
    }

    /// Make `merge_review` return an error
    pub fn fail_merge(&self, msg: &str) {
        *self.error_on_merge.lock().unwrap() = Some(msg.to_string());
    }

    // === Call inspection ===

    pub fn review(&self, iid: u64) -> ReviewState {
        self.reviews.lock().unwrap()[&iid].clone()
    }

    pub fn get_review_calls(&self) -> Vec<u64> {
        self.get_review_calls.lock().unwrap().clone()
    }

    pub fn labels_calls(&self) -> Vec<LabelsCall> {
        self.labels_calls.lock().unwrap().clone()
    }

    pub fn award_calls(&self) -> Vec<(u64, String)> {
        self.award_calls.lock().unwrap().clone()
    }

    pub fn trigger_calls(&self) -> Vec<u64> {
        self.trigger_calls.lock().unwrap().clone()
    }

    pub fn merge_calls(&self) -> Vec<MergeCall> {
        self.merge_calls.lock().unwrap().clone()
    }

    pub fn create_review_calls(&self) -> Vec<CreateReviewCall> {
        self.create_review_calls.lock().unwrap().clone()
    }

    /// Assert no review was merged
    pub fn assert_not_merged(&self) {
        let calls = self.merge_calls();
        assert!(calls.is_empty(), "expected no merges, got {calls:?}");
    }
}

#[async_trait]
impl PlatformService for MockGitLab {
    async fn get_review(&self, iid: u64) -> Result<ReviewState> {
        self.get_review_calls.lock().unwrap().push(iid);
        if let Some(msg) = self.error_on_get_review.lock().unwrap().as_ref() {
            return Err(Error::GitLabApi(msg.clone()));
        }
        self.reviews
            .lock()
            .unwrap()
            .get(&iid)
            .cloned()
            .ok_or_else(|| Error::GitLabApi(format!("404 Not Found: !{iid}")))
    }

    async fn list_awards(&self, iid: u64) -> Result<Vec<Award>> {
        Ok(self
            .awards
            .lock()
            .unwrap()
            .get(&iid)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_discussions(&self, iid: u64) -> Result<Vec<Discussion>> {
        Ok(self
            .discussions
            .lock()
            .unwrap()
            .get(&iid)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_branches(&self) -> Result<Vec<BranchInfo>> {
        Ok(self.branches.lock().unwrap().clone())
    }

    async fn get_branch(&self, name: &str) -> Result<Option<BranchInfo>> {
        Ok(self
            .branches
            .lock()
            .unwrap()
            .iter()
            .find(|b| b.name == name)
            .cloned())
    }

    async fn get_job(&self, id: u64) -> Result<Job> {
        self.jobs
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::GitLabApi(format!("404 Not Found: job {id}")))
    }

    async fn list_commit_reviews(&self, sha: &str) -> Result<Vec<CommitReview>> {
        Ok(self
            .commit_reviews
            .lock()
            .unwrap()
            .get(sha)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_labels(
        &self,
        iid: u64,
        add: &BTreeSet<String>,
        remove: &BTreeSet<String>,
    ) -> Result<()> {
        self.labels_calls.lock().unwrap().push(LabelsCall {
            iid,
            add: add.clone(),
            remove: remove.clone(),
        });
        if let Some(review) = self.reviews.lock().unwrap().get_mut(&iid) {
            review.labels.retain(|label| !remove.contains(label));
            for label in add {
                if !review.labels.contains(label) {
                    review.labels.push(label.clone());
                }
            }
        }
        Ok(())
    }

    async fn post_award(&self, iid: u64, name: &str) -> Result<()> {
        self.award_calls
            .lock()
            .unwrap()
            .push((iid, name.to_string()));
        self.awards.lock().unwrap().entry(iid).or_default().push(Award {
            name: name.to_string(),
            user: User {
                username: self.bot.clone(),
            },
        });
        Ok(())
    }

    async fn trigger_pipeline(&self, iid: u64) -> Result<()> {
        self.trigger_calls.lock().unwrap().push(iid);
        Ok(())
    }

    async fn merge_review(&self, iid: u64, params: &MergeParams) -> Result<MergeResult> {
        self.merge_calls.lock().unwrap().push(MergeCall {
            iid,
            params: params.clone(),
        });
        if let Some(msg) = self.error_on_merge.lock().unwrap().as_ref() {
            return Err(Error::GitLabApi(msg.clone()));
        }
        if let Some(message) = self.merge_refusal.lock().unwrap().clone() {
            return Ok(MergeResult {
                merged: false,
                sha: None,
                message: Some(message),
            });
        }
        if let Some(review) = self.reviews.lock().unwrap().get_mut(&iid) {
            review.state = ReviewStatus::Merged;
        }
        Ok(MergeResult {
            merged: true,
            sha: Some(params.sha.to_string()),
            message: None,
        })
    }

    async fn create_review(&self, source: &str, target: &str, title: &str) -> Result<ReviewState> {
        self.create_review_calls
            .lock()
            .unwrap()
            .push(CreateReviewCall {
                source: source.to_string(),
                target: target.to_string(),
                title: title.to_string(),
            });
        let iid = self.next_iid.fetch_add(1, Ordering::SeqCst);
        let mut review = make_review(iid, source, target, &self.bot, None);
        review.title = title.to_string();
        review.squash = false;
        self.set_review(review.clone());
        Ok(review)
    }
}

/// Open proposition review with squash enabled
pub fn make_review(
    iid: u64,
    source: &str,
    target: &str,
    author: &str,
    pipeline: Option<Pipeline>,
) -> ReviewState {
    ReviewState {
        iid,
        title: format!("Review {iid}"),
        state: ReviewStatus::Opened,
        source_branch: source.to_string(),
        target_branch: target.to_string(),
        author: User {
            username: author.to_string(),
        },
        draft: false,
        work_in_progress: false,
        squash: true,
        blocking_discussions_resolved: true,
        sha: pipeline.as_ref().map(|p| p.sha.clone()),
        head_pipeline: pipeline,
        labels: vec![],
        web_url: format!("https://gitlab.example.com/group/project/-/merge_requests/{iid}"),
    }
}

/// Pipeline running `sha`
pub fn make_pipeline(id: u64, sha: &str, git_ref: &str) -> Pipeline {
    Pipeline {
        id,
        sha: sha.to_string(),
        git_ref: Some(git_ref.to_string()),
    }
}
