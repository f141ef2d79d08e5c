//! Error types for fusion-bot

use thiserror::Error;

/// Errors produced by fusion-bot
///
/// Variants fall into four groups that callers treat differently:
/// configuration errors (fatal), staleness (clean no-op), transient
/// infrastructure failures (retryable) and lost storage races (retryable,
/// never reconciled in-process).
#[derive(Debug, Error)]
pub enum Error {
    /// Profile, rules or ownage file is missing or malformed
    #[error("configuration error: {0}")]
    Config(String),

    /// Teams referenced by configuration but not defined
    #[error("unknown teams: {}", .0.join(", "))]
    UnknownTeams(Vec<String>),

    /// Users referenced by configuration or status but not registered
    #[error("unknown users: {}", .0.join(", "))]
    UnknownUsers(Vec<String>),

    /// Value is not a commit SHA
    #[error("invalid sha: {0}")]
    InvalidSha(String),

    /// The triggering pipeline is no longer the review's head pipeline
    #[error("pipeline outdated")]
    PipelineOutdated,

    /// The target branch moved in a way that makes the review obsolete
    #[error("review obsolete: {0}")]
    ReviewObsolete(String),

    /// The review was retargeted while the operation ran
    #[error("review target changed")]
    TargetChanged,

    /// No persisted status exists for the review
    #[error("no status for review !{0}")]
    NoStatus(u64),

    /// GitLab API call failed
    #[error("GitLab API error: {0}")]
    GitLabApi(String),

    /// Git subprocess failed
    #[error("git error: {0}")]
    Git(String),

    /// Git subprocess exceeded its deadline
    #[error("git timed out after {0}s: {1}")]
    Timeout(u64, String),

    /// Storage branch moved underneath us
    #[error("storage race lost on {branch}: expected {expected}, found {found}")]
    RaceLost {
        /// Storage branch name
        branch: String,
        /// SHA this invocation pushed
        expected: String,
        /// SHA observed after re-fetch
        found: String,
    },

    /// Persisted asset could not be read or written
    #[error("storage error: {0}")]
    Storage(String),

    /// Authentication token unavailable
    #[error("authentication error: {0}")]
    Auth(String),

    /// Invariant violation inside fusion-bot
    #[error("internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// YAML (de)serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TOML parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid pattern in criteria
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl Error {
    /// Staleness errors end the operation as a no-op rather than a failure.
    pub const fn is_stale(&self) -> bool {
        matches!(
            self,
            Self::PipelineOutdated | Self::ReviewObsolete(_) | Self::TargetChanged
        )
    }

    /// Transient failures the outer scheduler should re-trigger.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::GitLabApi(_)
                | Self::Git(_)
                | Self::Timeout(..)
                | Self::RaceLost { .. }
                | Self::Http(_)
                | Self::Io(_)
        )
    }
}

/// Result type alias for fusion-bot
pub type Result<T> = std::result::Result<T, Error>;
