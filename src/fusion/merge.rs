//! Merge descriptors and review kinds
//!
//! A replication or integration review lives on a synthetic supply branch
//! whose name encodes the whole merge intent:
//! `<prefix>/-/<target>/-/<source>/-/<fork>`. Any invocation can rebuild
//! the descriptor from the review's source branch alone.

use crate::criteria::Criteria;
use crate::error::{Error, Result};
use crate::types::{ReviewState, Sha};
use serde::{Deserialize, Serialize};

const SEPARATOR: &str = "/-/";

/// What a review is supposed to bring into its target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merge {
    /// Commit being brought over
    pub fork: Sha,
    /// Kind prefix of the supply branch
    pub prefix: String,
    /// Branch the fork comes from
    pub source: String,
    /// Branch the fork goes to
    pub target: String,
    /// Synthetic branch carrying the review
    pub supply: String,
}

impl Merge {
    /// Build a descriptor and its supply branch name
    pub fn new(fork: Sha, prefix: &str, source: &str, target: &str) -> Result<Self> {
        for part in [prefix, source, target] {
            let dashed = part == "-" || part.starts_with("-/") || part.ends_with("/-");
            if part.is_empty() || dashed || part.contains(SEPARATOR) {
                return Err(Error::Config(format!("invalid merge component: {part:?}")));
            }
        }
        Ok(Self {
            supply: format!("{prefix}{SEPARATOR}{target}{SEPARATOR}{source}{SEPARATOR}{fork}"),
            fork,
            prefix: prefix.to_string(),
            source: source.to_string(),
            target: target.to_string(),
        })
    }

    /// Decode a supply branch name; `None` if the name is not one
    pub fn parse(supply: &str) -> Result<Option<Self>> {
        let parts: Vec<&str> = supply.split(SEPARATOR).collect();
        let [prefix, target, source, fork] = parts.as_slice() else {
            return Ok(None);
        };
        let merge = Self::new(Sha::new(fork)?, prefix, source, target)?;
        Ok(Some(merge))
    }

    /// Same merge intent for another fork commit
    pub fn with_fork(&self, fork: Sha) -> Result<Self> {
        Self::new(fork, &self.prefix, &self.source, &self.target)
    }
}

/// Rule for reviews authored by people
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropositionRule {
    /// Rule name for reports
    pub name: String,
    /// Source branches the rule applies to
    pub source: Criteria,
    /// Required title shape
    #[serde(default)]
    pub title: Option<Criteria>,
}

/// Replication of a long-lived branch into a fixed target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Supply branch prefix
    pub prefix: String,
    /// Branch replicated into
    pub target: String,
    /// Branches that may be replicated
    pub source: Criteria,
}

/// Operator-driven integration of a commit into another branch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationConfig {
    /// Supply branch prefix
    pub prefix: String,
    /// Allowed source/target pairs
    #[serde(default)]
    pub rules: Vec<IntegrationRule>,
}

/// Allowed integration direction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationRule {
    /// Source branches
    pub source: Criteria,
    /// Target branches
    pub target: Criteria,
}

/// Review kinds configured in the profile
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FusionConfig {
    /// Proposition rules
    #[serde(default)]
    pub proposition: Vec<PropositionRule>,
    /// Replication settings
    #[serde(default)]
    pub replication: Option<ReplicationConfig>,
    /// Integration settings
    #[serde(default)]
    pub integration: Option<IntegrationConfig>,
}

/// Kind of a review, decided by its source branch
#[derive(Debug, Clone, PartialEq)]
pub enum Kind {
    /// Authored change, squashed into the target; `None` when no rule matches
    Proposition(Option<PropositionRule>),
    /// Bot-driven replication of a source branch commit
    Replication(Merge),
    /// Operator-driven integration of a commit
    Integration(Merge),
}

impl Kind {
    /// Merge descriptor of bot-driven kinds
    pub const fn merge(&self) -> Option<&Merge> {
        match self {
            Self::Proposition(_) => None,
            Self::Replication(merge) | Self::Integration(merge) => Some(merge),
        }
    }

    /// Whether the review is authored by people
    pub const fn is_proposition(&self) -> bool {
        matches!(self, Self::Proposition(_))
    }

    /// Message of the commit GitLab creates on merge
    pub fn commit_message(&self, review: &ReviewState) -> String {
        match self {
            Self::Proposition(_) => format!("{} (!{})", review.title, review.iid),
            Self::Replication(merge) => format!("{} (!{})", Self::title(merge, true), review.iid),
            Self::Integration(merge) => format!("{} (!{})", Self::title(merge, false), review.iid),
        }
    }

    /// Title of a bot-driven review
    pub fn title(merge: &Merge, replication: bool) -> String {
        let verb = if replication { "Replicate" } else { "Integrate" };
        format!(
            "{verb} {} into {} at {}",
            merge.source,
            merge.target,
            merge.fork.short()
        )
    }
}

impl FusionConfig {
    /// Check prefixes can be told apart
    pub fn validate(&self) -> Result<()> {
        if let (Some(replication), Some(integration)) = (&self.replication, &self.integration) {
            if replication.prefix == integration.prefix {
                return Err(Error::Config(
                    "replication and integration prefixes must differ".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Decide the kind of a review from its source branch
    pub fn make_kind(&self, source_branch: &str) -> Result<Kind> {
        self.validate()?;
        let Some(merge) = Merge::parse(source_branch)? else {
            let mut rules = self
                .proposition
                .iter()
                .filter(|rule| rule.source.is_met(source_branch));
            let rule = rules.next().cloned();
            if rules.next().is_some() {
                return Err(Error::Config(format!(
                    "{source_branch} matches multiple proposition rules"
                )));
            }
            return Ok(Kind::Proposition(rule));
        };
        if self
            .replication
            .as_ref()
            .is_some_and(|r| r.prefix == merge.prefix)
        {
            return Ok(Kind::Replication(merge));
        }
        if self
            .integration
            .as_ref()
            .is_some_and(|i| i.prefix == merge.prefix)
        {
            return Ok(Kind::Integration(merge));
        }
        Err(Error::Config(format!(
            "{source_branch}: prefix {} not configured",
            merge.prefix
        )))
    }

    /// Descriptor replicating `fork` from `source`
    pub fn make_replication(&self, source: &str, fork: Sha) -> Result<Merge> {
        let replication = self
            .replication
            .as_ref()
            .ok_or_else(|| Error::Config("replication not configured".to_string()))?;
        if !replication.source.is_met(source) {
            return Err(Error::Config(format!("{source} is not replicated")));
        }
        Merge::new(fork, &replication.prefix, source, &replication.target)
    }

    /// Descriptor integrating `fork` from `source` into `target`
    pub fn make_integration(&self, source: &str, target: &str, fork: Sha) -> Result<Merge> {
        let integration = self
            .integration
            .as_ref()
            .ok_or_else(|| Error::Config("integration not configured".to_string()))?;
        if !integration
            .rules
            .iter()
            .any(|rule| rule.source.is_met(source) && rule.target.is_met(target))
        {
            return Err(Error::Config(format!(
                "integration from {source} into {target} not allowed"
            )));
        }
        Merge::new(fork, &integration.prefix, source, target)
    }
}
