//! Persisted per-review approval record

use crate::types::Sha;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// How a recorded approval counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Approval that survives later commits outside broken teams
    Approved,
    /// Approval invalidated by any later change
    Fragile,
    /// Explicit hold on the merge
    Blocked,
    /// Approval pinned to a commit that was superseded
    Outdated,
}

impl Resolution {
    /// Whether the resolution counts as approval
    pub const fn is_approved(self) -> bool {
        matches!(self, Self::Approved | Self::Fragile)
    }

    /// Whether the resolution holds the merge
    pub const fn is_blocking(self) -> bool {
        matches!(self, Self::Blocked)
    }
}

/// One user's decision, pinned to the commit it was given on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approve {
    /// Login of the deciding user
    pub approver: String,
    /// Head commit at decision time
    pub commit: Sha,
    /// Decision
    pub resolution: Resolution,
}

/// Durable approval state of one review
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStatus {
    /// Review iid
    pub review: u64,
    /// Target branch the approvals were collected for
    pub target: String,
    /// Users owning the change
    #[serde(default)]
    pub authors: BTreeSet<String>,
    /// Decisions by login
    #[serde(default)]
    pub approves: BTreeMap<String, Approve>,
    /// Commit an operator bypass was recorded for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emergent: Option<Sha>,
    /// Last commit confirmed fully approved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified: Option<Sha>,
    /// Teams involved in the last resolution pass
    #[serde(default)]
    pub teams: BTreeSet<String>,
    /// Selected designated approvers
    #[serde(default)]
    pub legates: BTreeSet<String>,
    /// Selected random reviewers
    #[serde(default)]
    pub randoms: BTreeSet<String>,
    /// Commits excluded from ownership resolution
    #[serde(default)]
    pub skip: BTreeSet<Sha>,
    /// Whether an external blocker was present in the last pass
    #[serde(default)]
    pub blocked: bool,
}

/// All persisted statuses keyed by review iid
pub type Statuses = BTreeMap<u64, ApprovalStatus>;

impl ApprovalStatus {
    /// Fresh status for a newly seen review
    pub fn new(review: u64, target: &str, authors: BTreeSet<String>) -> Self {
        Self {
            review,
            target: target.to_string(),
            authors,
            approves: BTreeMap::new(),
            emergent: None,
            verified: None,
            teams: BTreeSet::new(),
            legates: BTreeSet::new(),
            randoms: BTreeSet::new(),
            skip: BTreeSet::new(),
            blocked: false,
        }
    }

    /// Record a decision, replacing any earlier one by the same user
    pub fn approve(&mut self, user: &str, commit: Sha, resolution: Resolution) {
        self.approves.insert(
            user.to_string(),
            Approve {
                approver: user.to_string(),
                commit,
                resolution,
            },
        );
    }

    /// Mark approvals of `users` as outdated; blocks and absent users are untouched
    pub fn invalidate<'a>(&mut self, users: impl IntoIterator<Item = &'a String>) {
        for user in users {
            if let Some(approve) = self.approves.get_mut(user) {
                if approve.resolution.is_approved() {
                    approve.resolution = Resolution::Outdated;
                }
            }
        }
    }

    /// Re-pin every decision and checkpoint to `sha`
    ///
    /// Used when the bot itself rewrote the head commit without changing
    /// its content.
    pub fn squash_approves(&mut self, sha: &Sha) {
        for approve in self.approves.values_mut() {
            approve.commit = sha.clone();
        }
        if self.emergent.is_some() {
            self.emergent = Some(sha.clone());
        }
        if self.verified.is_some() {
            self.verified = Some(sha.clone());
        }
    }

    /// Add a co-author; returns false if already present
    pub fn set_author(&mut self, user: &str) -> bool {
        self.authors.insert(user.to_string())
    }

    /// Remove a co-author; the last author cannot be removed
    pub fn unset_author(&mut self, user: &str) -> bool {
        if self.authors.len() <= 1 || !self.authors.contains(user) {
            return false;
        }
        self.authors.remove(user)
    }

    /// Users whose decision counts as approval
    pub fn approved_users(&self) -> BTreeSet<String> {
        self.approves
            .iter()
            .filter(|(_, a)| a.resolution.is_approved())
            .map(|(user, _)| user.clone())
            .collect()
    }

    /// Users holding the merge
    pub fn blocking_users(&self) -> BTreeSet<String> {
        self.approves
            .iter()
            .filter(|(_, a)| a.resolution.is_blocking())
            .map(|(user, _)| user.clone())
            .collect()
    }

    /// Users recorded with a given resolution
    pub fn users_with(&self, resolution: Resolution) -> BTreeSet<String> {
        self.approves
            .iter()
            .filter(|(_, a)| a.resolution == resolution)
            .map(|(user, _)| user.clone())
            .collect()
    }

    /// Commits that approvals or the bypass are pinned to
    pub fn approved_commits(&self) -> BTreeSet<Sha> {
        self.approves
            .values()
            .filter(|a| a.resolution.is_approved())
            .map(|a| a.commit.clone())
            .chain(self.emergent.clone())
            .collect()
    }

    /// Every login the status refers to
    pub fn users(&self) -> BTreeSet<String> {
        self.authors
            .iter()
            .chain(self.approves.keys())
            .chain(&self.legates)
            .chain(&self.randoms)
            .cloned()
            .collect()
    }
}
