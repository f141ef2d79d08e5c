//! Report payloads handed back to the caller
//!
//! Operations never notify anybody themselves. They describe what happened
//! as [`Report`]s, and the binary prints them as JSON lines for whatever
//! delivers chat or mail notifications downstream.

use crate::approval::engine::{ApprovalState, Blocker};
use crate::fusion::check::Problem;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Something worth telling the review participants
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    /// When it happened
    pub at: DateTime<Utc>,
    /// Review iid
    pub review: u64,
    /// Review web URL
    #[serde(skip_serializing_if = "String::is_empty")]
    pub url: String,
    /// What happened
    #[serde(flatten)]
    pub event: Event,
}

impl Report {
    /// Report an event for a review, stamped now
    pub fn new(review: u64, url: &str, event: Event) -> Self {
        Self {
            at: Utc::now(),
            review,
            url: url.to_string(),
            event,
        }
    }
}

/// Event kinds
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    /// Bot opened a replication or integration review
    ReviewCreated {
        /// Review authors
        authors: BTreeSet<String>,
    },
    /// Resolution could not run or the review cannot merge
    ReviewStopped {
        /// Merge-legality problems
        problems: Vec<Problem>,
        /// Unregistered users
        unknown_users: BTreeSet<String>,
        /// Undefined teams
        unknown_teams: BTreeSet<String>,
    },
    /// Approval state changed
    ReviewUpdated {
        /// New state
        state: ApprovalState,
        /// External blockers
        blockers: Vec<Blocker>,
        /// Selected users without a decision
        slackers: BTreeSet<String>,
        /// Users holding the merge
        holders: BTreeSet<String>,
        /// Outdated approvals by commit
        outdaters: BTreeMap<String, BTreeSet<String>>,
        /// Teams whose quorum cannot be reached
        unapprovable: BTreeSet<String>,
        /// Users following the review
        watchers: BTreeSet<String>,
    },
    /// Review got its approvals
    ReviewApproved {
        /// Selected users who approved
        accepters: BTreeSet<String>,
    },
    /// Review heads its queue
    ReviewQueued,
    /// GitLab merged the review
    ReviewMerged {
        /// Resulting commit
        sha: Option<String>,
    },
    /// GitLab refused the merge
    ReviewMergeError {
        /// GitLab's explanation
        error: String,
    },
    /// Target could not be merged into the source automatically
    MergeConflicts,
    /// Review was closed or merged outside the bot
    ReviewClosed,
}
