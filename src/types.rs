//! Core types for fusion-bot

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// A git commit id (hex, 40 or 64 characters)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sha(String);

impl Sha {
    /// Validate and normalize a commit id
    pub fn new(value: &str) -> Result<Self> {
        let value = value.trim();
        let valid_len = value.len() == 40 || value.len() == 64;
        if !valid_len || !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidSha(value.to_string()));
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    /// The hex string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for log lines and commit messages
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl TryFrom<String> for Sha {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl From<Sha> for String {
    fn from(sha: Sha) -> Self {
        sha.0
    }
}

impl std::fmt::Display for Sha {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A revision argument for git commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitRef {
    /// A concrete commit
    Sha(Sha),
    /// First parent of a commit (`sha^1`)
    FirstParent(Sha),
    /// Remote-tracking branch (`refs/remotes/<remote>/<name>`)
    Remote(String),
    /// Currently checked out commit
    Head,
    /// A tree object id
    Tree(String),
}

/// Id of the empty tree, the diff base of root commits
pub const EMPTY_TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

impl GitRef {
    /// Render as a revision for the given remote
    pub fn rev(&self, remote: &str) -> String {
        match self {
            Self::Sha(sha) => sha.to_string(),
            Self::FirstParent(sha) => format!("{sha}^1"),
            Self::Remote(name) => format!("refs/remotes/{remote}/{name}"),
            Self::Head => "HEAD".to_string(),
            Self::Tree(id) => id.clone(),
        }
    }
}

impl From<&Sha> for GitRef {
    fn from(sha: &Sha) -> Self {
        Self::Sha(sha.clone())
    }
}

/// Commit author/committer identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Display name
    pub name: String,
    /// Email address
    pub email: String,
}

/// A GitLab user reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Login
    pub username: String,
}

/// Pipeline reference attached to a review or job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    /// Pipeline id
    pub id: u64,
    /// Commit the pipeline runs for
    pub sha: String,
    /// Ref the pipeline runs for
    #[serde(default, rename = "ref")]
    pub git_ref: Option<String>,
}

/// Merge request state as GitLab reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    /// Open for review
    Opened,
    /// Closed without merging
    Closed,
    /// Merged
    Merged,
    /// Locked by GitLab while merging
    Locked,
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Opened => write!(f, "opened"),
            Self::Closed => write!(f, "closed"),
            Self::Merged => write!(f, "merged"),
            Self::Locked => write!(f, "locked"),
        }
    }
}

/// Merge request state relevant to approval resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct ReviewState {
    /// MR iid
    pub iid: u64,
    /// MR title
    pub title: String,
    /// Current state
    pub state: ReviewStatus,
    /// Source branch name
    pub source_branch: String,
    /// Target branch name
    pub target_branch: String,
    /// MR author
    pub author: User,
    /// Whether MR is a draft
    #[serde(default)]
    pub draft: bool,
    /// Whether the title carries a WIP marker
    #[serde(default)]
    pub work_in_progress: bool,
    /// Whether GitLab will squash on merge
    #[serde(default)]
    pub squash: bool,
    /// Whether every blocking discussion is resolved
    #[serde(default = "default_true")]
    pub blocking_discussions_resolved: bool,
    /// Latest pipeline for the MR
    #[serde(default)]
    pub head_pipeline: Option<Pipeline>,
    /// Source branch tip known to GitLab
    #[serde(default)]
    pub sha: Option<String>,
    /// Labels currently set
    #[serde(default)]
    pub labels: Vec<String>,
    /// Web URL for the MR
    #[serde(default)]
    pub web_url: String,
}

const fn default_true() -> bool {
    true
}

impl ReviewState {
    /// Head commit the approval pass runs against
    ///
    /// The head pipeline's commit is preferred since that is what CI
    /// validated; the branch tip is the fallback for reviews without one.
    pub fn head(&self) -> Result<Sha> {
        let value = self
            .head_pipeline
            .as_ref()
            .map(|p| p.sha.as_str())
            .or(self.sha.as_deref())
            .ok_or_else(|| Error::GitLabApi(format!("review !{} has no head commit", self.iid)))?;
        Sha::new(value)
    }

    /// Whether the review is finished one way or another
    pub const fn is_closed(&self) -> bool {
        matches!(self.state, ReviewStatus::Closed | ReviewStatus::Merged)
    }
}

/// An award emoji on a review
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Award {
    /// Emoji name
    pub name: String,
    /// Awarding user
    pub user: User,
}

/// A note within a discussion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    /// Note author
    pub author: User,
    /// Whether the note can be resolved
    #[serde(default)]
    pub resolvable: bool,
    /// Whether the note was resolved
    #[serde(default)]
    pub resolved: bool,
}

/// A review discussion thread
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discussion {
    /// Discussion id
    pub id: String,
    /// Notes in thread order
    #[serde(default)]
    pub notes: Vec<Note>,
}

impl Discussion {
    /// Whether a resolvable note is still open
    pub fn is_unresolved(&self) -> bool {
        self.notes.iter().any(|n| n.resolvable && !n.resolved)
    }
}

/// A repository branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchInfo {
    /// Branch name
    pub name: String,
    /// Whether the branch is protected
    #[serde(default)]
    pub protected: bool,
    /// Whether the branch is the project default
    #[serde(default)]
    pub default: bool,
}

/// A CI job, used to identify the triggering user and pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Job id
    pub id: u64,
    /// User that started the job
    pub user: User,
    /// Pipeline the job belongs to
    pub pipeline: Pipeline,
}

/// A merge request listed for a commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReview {
    /// MR iid
    pub iid: u64,
    /// MR author
    pub author: User,
    /// Commit the MR was squashed into, once merged
    #[serde(default)]
    pub squash_commit_sha: Option<String>,
}

/// Parameters of a merge call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeParams {
    /// Squash source commits into one
    pub squash: bool,
    /// Message for the resulting commit
    pub commit_message: String,
    /// Merge only if the source tip is still this commit
    pub sha: Sha,
    /// Delete the source branch afterwards
    pub should_remove_source_branch: bool,
}

/// Result of a merge operation
#[derive(Debug, Clone)]
pub struct MergeResult {
    /// Whether the merge was successful
    pub merged: bool,
    /// The SHA of the merge commit (if successful)
    pub sha: Option<String>,
    /// Message from the merge operation (especially on failure)
    pub message: Option<String>,
}
