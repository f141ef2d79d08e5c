//! Configuration: the TOML profile plus the YAML rule files it points to
//!
//! The profile describes the bot itself (GitLab project, git remote,
//! storage layout, review kinds). Approval rules, haters and code ownage are
//! YAML documents maintained by the teams, loaded separately so the ownage
//! can be read from the reviewed commit.

use crate::approval::team::{Team, TeamConfig};
use crate::criteria::Criteria;
use crate::error::{Error, Result};
use crate::fusion::merge::FusionConfig;
use crate::ownership::Ownage;
use crate::types::Identity;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Default per-invocation git subprocess timeout in seconds
pub const DEFAULT_GIT_TIMEOUT_SECS: u64 = 300;

/// Bot profile, usually `fusion.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// GitLab connection
    pub gitlab: GitLabConfig,
    /// Local git settings
    #[serde(default)]
    pub git: GitConfig,
    /// Storage branch layout
    #[serde(default)]
    pub storage: StorageConfig,
    /// Approval file locations
    pub approval: ApprovalConfig,
    /// Review kinds
    #[serde(default)]
    pub fusion: FusionConfig,
    /// Files whose change on the target makes open reviews obsolete
    #[serde(default)]
    pub obsolescence: Option<Criteria>,
}

/// GitLab connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitLabConfig {
    /// API root, e.g. `https://gitlab.example.com/api/v4`; `CI_API_V4_URL` wins when set
    #[serde(default)]
    pub api_url: Option<String>,
    /// Project id or path; `CI_PROJECT_ID` wins when set
    #[serde(default)]
    pub project: Option<String>,
    /// Environment variable holding the API token
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// Login of the bot account
    pub bot: String,
}

fn default_token_env() -> String {
    "FUSION_TOKEN".to_string()
}

/// Local git settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    /// Remote the review branches live on
    #[serde(default = "default_remote")]
    pub remote: String,
    /// Deadline for a single git subprocess
    #[serde(default = "default_git_timeout")]
    pub timeout_secs: u64,
    /// Author name of commits the bot creates
    #[serde(default = "default_identity_name")]
    pub name: String,
    /// Author email of commits the bot creates
    #[serde(default = "default_identity_email")]
    pub email: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            remote: default_remote(),
            timeout_secs: DEFAULT_GIT_TIMEOUT_SECS,
            name: default_identity_name(),
            email: default_identity_email(),
        }
    }
}

impl GitConfig {
    /// Identity used for storage and normalization commits
    pub fn identity(&self) -> Identity {
        Identity {
            name: self.name.clone(),
            email: self.email.clone(),
        }
    }
}

fn default_identity_name() -> String {
    "Fusion Bot".to_string()
}

fn default_identity_email() -> String {
    "fusion-bot@localhost".to_string()
}

fn default_remote() -> String {
    "origin".to_string()
}

const fn default_git_timeout() -> u64 {
    DEFAULT_GIT_TIMEOUT_SECS
}

/// Where persisted assets live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Branch holding the assets
    #[serde(default = "default_storage_branch")]
    pub branch: String,
    /// Path of the statuses asset
    #[serde(default = "default_statuses")]
    pub statuses: String,
    /// Path of the queue asset
    #[serde(default = "default_queue")]
    pub queue: String,
    /// Path of the approvers asset
    #[serde(default = "default_approvers")]
    pub approvers: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            branch: default_storage_branch(),
            statuses: default_statuses(),
            queue: default_queue(),
            approvers: default_approvers(),
        }
    }
}

fn default_storage_branch() -> String {
    "fusion-storage".to_string()
}

fn default_statuses() -> String {
    "statuses.yaml".to_string()
}

fn default_queue() -> String {
    "queue.yaml".to_string()
}

fn default_approvers() -> String {
    "approvers.yaml".to_string()
}

/// Approval file locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Rules file, relative to the profile
    pub rules: PathBuf,
    /// Ownage file path inside the reviewed tree
    pub ownage: String,
    /// Haters file, relative to the profile
    #[serde(default)]
    pub haters: Option<PathBuf>,
    /// Award emoji posted once a review is verified
    #[serde(default)]
    pub award: Option<String>,
}

impl Profile {
    /// Load a profile from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Parse and validate a profile
    pub fn from_toml(content: &str) -> Result<Self> {
        let profile: Self = toml::from_str(content)?;
        profile.fusion.validate()?;
        if profile.git.timeout_secs == 0 {
            return Err(Error::Config("git.timeout_secs must be positive".to_string()));
        }
        Ok(profile)
    }
}

/// Approval rules, usually `rules.yaml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Rules {
    /// Team that must approve changes to the bot configuration itself
    #[serde(default)]
    pub sanity: Option<String>,
    /// Lottery weights by login
    #[serde(default)]
    pub weights: BTreeMap<String, u64>,
    /// Lottery weight of users without an entry
    #[serde(default = "default_base_weight")]
    pub base_weight: u64,
    /// Teams by name
    #[serde(default)]
    pub teams: BTreeMap<String, TeamConfig>,
    /// Random team to the teams whose involvement triggers it
    #[serde(default)]
    pub randoms: BTreeMap<String, BTreeSet<String>>,
    /// Team to the authors it always reviews
    #[serde(default)]
    pub authorship: BTreeMap<String, BTreeSet<String>>,
    /// Team to the source branches it reviews
    #[serde(default)]
    pub source_branch: BTreeMap<String, Criteria>,
    /// Team to the target branches it reviews
    #[serde(default)]
    pub target_branch: BTreeMap<String, Criteria>,
}

const fn default_base_weight() -> u64 {
    1
}

impl Rules {
    /// Load rules from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_yaml(&content)
    }

    /// Parse and validate rules
    pub fn from_yaml(content: &str) -> Result<Self> {
        let rules: Self = serde_yaml::from_str(content)?;
        rules.validate()?;
        Ok(rules)
    }

    /// Reject teams that can never be satisfied meaningfully
    pub fn validate(&self) -> Result<()> {
        let empty: Vec<&str> = self
            .teams
            .iter()
            .filter(|(_, team)| team.quorum == 0)
            .map(|(name, _)| name.as_str())
            .collect();
        if !empty.is_empty() {
            return Err(Error::Config(format!(
                "teams with zero quorum: {}",
                empty.join(", ")
            )));
        }
        Ok(())
    }

    /// Working copy of a configured team
    pub fn team(&self, name: &str) -> Result<Team> {
        self.teams
            .get(name)
            .map(|config| Team::new(name, config))
            .ok_or_else(|| Error::UnknownTeams(vec![name.to_string()]))
    }

    /// Teams referenced by the rules or `ownage` without a definition
    pub fn unknown_teams(&self, ownage: &Ownage) -> BTreeSet<String> {
        self.sanity
            .iter()
            .chain(ownage.keys())
            .chain(self.target_branch.keys())
            .chain(self.source_branch.keys())
            .chain(self.authorship.keys())
            .chain(self.randoms.keys())
            .chain(self.randoms.values().flatten())
            .filter(|team| !self.teams.contains_key(*team))
            .cloned()
            .collect()
    }

    /// Every login the rules mention
    pub fn users(&self) -> BTreeSet<String> {
        let teams = self.teams.values().flat_map(|t| {
            t.random
                .iter()
                .chain(&t.reserve)
                .chain(&t.optional)
                .chain(&t.required)
        });
        self.authorship
            .values()
            .flatten()
            .chain(teams)
            .cloned()
            .collect()
    }
}

/// A registered approver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approver {
    /// Whether the user can currently be assigned
    pub active: bool,
    /// Teams whose reviews the user follows
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub watch_teams: BTreeSet<String>,
    /// Authors whose reviews the user follows
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub watch_authors: BTreeSet<String>,
}

/// Registered approvers by login
pub type Approvers = BTreeMap<String, Approver>;

/// Hater login to the authors they are never randomly assigned to
pub type Haters = BTreeMap<String, BTreeSet<String>>;

/// Load haters; a missing file means nobody hates anybody
pub fn load_haters(path: Option<&Path>) -> Result<Haters> {
    let Some(path) = path else {
        return Ok(Haters::new());
    };
    if !path.exists() {
        return Ok(Haters::new());
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
    Ok(serde_yaml::from_str(&content)?)
}

/// Parse the ownage document read from the reviewed tree
pub fn parse_ownage(content: &str) -> Result<Ownage> {
    Ok(serde_yaml::from_str(content)?)
}
