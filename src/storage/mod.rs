//! Persistence of bot state on a dedicated branch
//!
//! Statuses, the queue and the approver registry are YAML documents
//! committed to the storage branch of the reviewed repository. Every
//! invocation loads them at the fetched tip and writes back one commit on
//! top of that tip. The push never forces; after pushing, the branch is
//! fetched again and must point at the commit just written; anything else
//! means another job won the race and this invocation must be retried.

use crate::approval::status::Statuses;
use crate::config::{Approvers, StorageConfig};
use crate::error::{Error, Result};
use crate::fusion::queue::Queue;
use crate::git::GitService;
use crate::types::{GitRef, Identity, Sha};
use tracing::{debug, info};

const HEADER: &str = "# fusion-bot storage\n# Auto-generated - manual edits may be overwritten\n\n";

/// Why the assets are written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// Review seen for the first time
    Create,
    /// Resolution pass
    Update,
    /// User decision recorded
    Approve,
    /// Co-author added
    Own,
    /// Co-author removed
    Unown,
    /// Commit excluded from ownership
    Skip,
    /// Operator bypass
    Emergent,
    /// Review queued
    Enqueue,
    /// Review left the queue
    Dequeue,
    /// Review merged
    Merge,
    /// Housekeeping
    Clean,
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Approve => "approve",
            Self::Own => "own",
            Self::Unown => "unown",
            Self::Skip => "skip",
            Self::Emergent => "emergent",
            Self::Enqueue => "enqueue",
            Self::Dequeue => "dequeue",
            Self::Merge => "merge",
            Self::Clean => "clean",
        };
        f.write_str(name)
    }
}

/// Persisted state of the bot
#[derive(Debug, Clone, Default)]
pub struct Assets {
    /// Approval statuses by review
    pub statuses: Statuses,
    /// Merge queue
    pub queue: Queue,
    /// Approver registry
    pub approvers: Approvers,
}

/// Rendered form of the assets, used to find what changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Snapshot {
    statuses: String,
    queue: String,
    approvers: String,
}

impl Snapshot {
    fn render(assets: &Assets) -> Result<Self> {
        Ok(Self {
            statuses: serde_yaml::to_string(&assets.statuses)?,
            queue: assets.queue.to_yaml()?,
            approvers: serde_yaml::to_string(&assets.approvers)?,
        })
    }
}

/// Handle on the storage branch
#[derive(Debug, Clone)]
pub struct Storage {
    config: StorageConfig,
    tip: Option<Sha>,
    snapshot: Snapshot,
}

fn parse<T: serde::de::DeserializeOwned + Default>(content: Option<String>, path: &str) -> Result<T> {
    match content {
        None => Ok(T::default()),
        Some(text) if text.trim().is_empty() => Ok(T::default()),
        Some(text) => serde_yaml::from_str::<Option<T>>(&text)
            .map(Option::unwrap_or_default)
            .map_err(|e| Error::Storage(format!("failed to parse {path}: {e}"))),
    }
}

impl Storage {
    /// Fetch the storage branch and read the assets at its tip
    ///
    /// A missing branch yields empty assets; the first store creates it.
    pub async fn load(git: &dyn GitService, config: &StorageConfig) -> Result<(Self, Assets)> {
        let tip = git.fetch_branch(&config.branch).await?;
        let mut assets = Assets::default();
        if let Some(tip) = &tip {
            let rev = GitRef::Sha(tip.clone());
            assets.statuses = parse(git.show_file(&rev, &config.statuses).await?, &config.statuses)?;
            assets.approvers =
                parse(git.show_file(&rev, &config.approvers).await?, &config.approvers)?;
            assets.queue = match git.show_file(&rev, &config.queue).await? {
                Some(text) if !text.trim().is_empty() => Queue::from_yaml(&text)
                    .map_err(|e| Error::Storage(format!("failed to parse {}: {e}", config.queue)))?,
                _ => Queue::default(),
            };
        }
        debug!(
            branch = %config.branch,
            tip = ?tip,
            statuses = assets.statuses.len(),
            approvers = assets.approvers.len(),
            "loaded storage"
        );
        let storage = Self {
            config: config.clone(),
            tip,
            snapshot: Snapshot::render(&assets)?,
        };
        Ok((storage, assets))
    }

    /// Commit loaded by [`Self::load`] or written by the last store
    pub const fn tip(&self) -> Option<&Sha> {
        self.tip.as_ref()
    }

    /// Write changed assets and push them
    ///
    /// Returns false when nothing changed. A concurrent writer surfaces as
    /// [`Error::RaceLost`].
    pub async fn store(
        &mut self,
        git: &dyn GitService,
        assets: &Assets,
        reason: Reason,
        review: Option<u64>,
        identity: &Identity,
    ) -> Result<bool> {
        let snapshot = Snapshot::render(assets)?;
        let mut files = Vec::new();
        for (path, old, new) in [
            (&self.config.statuses, &self.snapshot.statuses, &snapshot.statuses),
            (&self.config.queue, &self.snapshot.queue, &snapshot.queue),
            (&self.config.approvers, &self.snapshot.approvers, &snapshot.approvers),
        ] {
            if old != new || self.tip.is_none() {
                files.push((path.clone(), format!("{HEADER}{new}")));
            }
        }
        if self.tip.is_some() && files.is_empty() {
            debug!(%reason, "storage unchanged");
            return Ok(false);
        }

        let message = match review {
            Some(iid) => format!("fusion: {reason} !{iid}"),
            None => format!("fusion: {reason}"),
        };
        let commit = git
            .commit_files(self.tip.as_ref(), &files, &message, identity)
            .await?;
        let branch = &self.config.branch;
        let pushed = git.push(branch, &commit, false).await;
        let found = git.fetch_branch(branch).await?;
        if found.as_ref() != Some(&commit) {
            return Err(Error::RaceLost {
                branch: branch.clone(),
                expected: commit.to_string(),
                found: found.map_or_else(|| "nothing".to_string(), |sha| sha.to_string()),
            });
        }
        pushed?;
        info!(%branch, sha = %commit, %reason, "stored assets");
        self.tip = Some(commit);
        self.snapshot = snapshot;
        Ok(true)
    }
}
