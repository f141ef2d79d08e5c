//! Team approver pools and the narrowing rules applied during resolution
//!
//! A [`Team`] is rebuilt from configuration on every resolution pass and
//! narrowed by a fixed sequence of [`Rule`]s. Each application consumes the
//! team and returns the narrowed value, so a pass reads as a fold over rules.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Team as configured in the rules file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamConfig {
    /// Approvals needed from the team
    pub quorum: usize,
    /// Approvals survive later commits touching the team's files
    #[serde(default)]
    pub advance: bool,
    /// Labels set on reviews involving the team
    #[serde(default)]
    pub labels: Vec<String>,
    /// Pool for random reviewer assignment
    #[serde(default)]
    pub random: Vec<String>,
    /// Last-resort approvers
    #[serde(default)]
    pub reserve: Vec<String>,
    /// Preferred approvers
    #[serde(default)]
    pub optional: Vec<String>,
    /// Designated approvers
    #[serde(default)]
    pub required: Vec<String>,
}

/// Which pools a selection pass draws from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Required/optional/reserve approvers (legates)
    Legates,
    /// Random reviewer pool
    Randoms,
}

/// A narrowing step applied to a [`Team`]
#[derive(Debug, Clone, Copy)]
pub enum Rule<'a> {
    /// Keep only currently usable users
    Active(&'a BTreeSet<String>),
    /// Count users already taking part toward the quorum and drop them
    Involved(&'a BTreeSet<String>),
    /// Drop users from every pool without touching the quorum
    Exclude(&'a BTreeSet<String>),
    /// Clear the pools not used by the selection pass
    Mode(Selection),
}

/// Working copy of a team during resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Team {
    /// Team name
    pub name: String,
    /// Approvals still missing
    pub quorum: usize,
    /// Labels set on reviews involving the team
    pub labels: Vec<String>,
    /// Random reviewer pool
    pub random: BTreeSet<String>,
    /// Last-resort approvers
    pub reserve: BTreeSet<String>,
    /// Preferred approvers
    pub optional: BTreeSet<String>,
    /// Designated approvers
    pub required: BTreeSet<String>,
    /// Approvals survive later commits touching the team's files
    pub advance_approval: bool,
}

impl Team {
    /// Build the working copy of a configured team
    pub fn new(name: &str, config: &TeamConfig) -> Self {
        Self {
            name: name.to_string(),
            quorum: config.quorum,
            labels: config.labels.clone(),
            random: config.random.iter().cloned().collect(),
            reserve: config.reserve.iter().cloned().collect(),
            optional: config.optional.iter().cloned().collect(),
            required: config.required.iter().cloned().collect(),
            advance_approval: config.advance,
        }
    }

    /// Everyone who may approve for the team (random pool excluded)
    pub fn approvers(&self) -> BTreeSet<String> {
        self.reserve
            .iter()
            .chain(&self.optional)
            .chain(&self.required)
            .cloned()
            .collect()
    }

    /// Apply one narrowing rule
    #[must_use]
    pub fn apply(mut self, rule: Rule<'_>) -> Self {
        match rule {
            Rule::Active(active) => {
                self.required = &self.required & active;
                self.optional = &(&self.optional & active) - &self.required;
                self.reserve = &(&(&self.reserve & active) - &self.required) - &self.optional;
                self.random = &self.random & active;
            }
            Rule::Involved(involved) => {
                let counted = self
                    .required
                    .iter()
                    .chain(&self.optional)
                    .chain(&self.random)
                    .filter(|u| involved.contains(*u))
                    .collect::<BTreeSet<_>>()
                    .len();
                self.quorum = self.quorum.saturating_sub(counted);
                self.required = &self.required - involved;
                self.optional = &self.optional - involved;
                self.random = &self.random - involved;
                if self.required.is_empty() && self.optional.is_empty() {
                    let counted = self.reserve.intersection(involved).count();
                    self.quorum = self.quorum.saturating_sub(counted);
                    self.reserve = &self.reserve - involved;
                }
            }
            Rule::Exclude(users) => {
                self.required = &self.required - users;
                self.optional = &self.optional - users;
                self.reserve = &self.reserve - users;
                self.random = &self.random - users;
            }
            Rule::Mode(Selection::Randoms) => {
                self.required.clear();
                self.optional.clear();
                self.reserve.clear();
            }
            Rule::Mode(Selection::Legates) => self.random.clear(),
        }
        self
    }

    /// Apply rules in order
    #[must_use]
    pub fn apply_all<'a>(self, rules: impl IntoIterator<Item = Rule<'a>>) -> Self {
        rules.into_iter().fold(self, Self::apply)
    }

    /// Whether picking `user` would bring the team closer to its quorum
    ///
    /// While required approvers are left only they count. Reserve
    /// approvers only count once no required or optional approver is left.
    pub fn is_needed(&self, user: &str) -> bool {
        if self.quorum == 0 {
            return false;
        }
        if self.random.contains(user) {
            return true;
        }
        if !self.required.is_empty() {
            return self.required.contains(user);
        }
        if self.optional.contains(user) {
            return true;
        }
        self.optional.is_empty() && self.reserve.contains(user)
    }

    /// Users the team cannot do without
    ///
    /// Empty when there is a genuine choice left for weighted selection.
    pub fn necessary(&self) -> BTreeSet<String> {
        if self.quorum == 0 {
            return BTreeSet::new();
        }
        let preferred: BTreeSet<String> = self.optional.union(&self.required).cloned().collect();
        let everyone: BTreeSet<String> = preferred.union(&self.reserve).cloned().collect();
        if everyone.len() <= self.quorum {
            return everyone;
        }
        if preferred.len() <= self.quorum {
            return preferred;
        }
        if self.required.len() <= self.quorum {
            return self.required.clone();
        }
        BTreeSet::new()
    }
}
