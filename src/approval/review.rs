//! Per-review assembly of resolution inputs
//!
//! A [`Review`] collects everything the engine needs about one merge
//! request: which teams are involved by branch, authorship and diff, which
//! commits changed which owned areas, and which approved commits were
//! followed by others. Git facts are fed in by the caller; nothing here
//! performs I/O.

use crate::approval::engine::{self, ApprovalInput, ApprovalResult, Blocker};
use crate::approval::select::RandomSource;
use crate::approval::status::ApprovalStatus;
use crate::config::{Approvers, Haters, Rules};
use crate::error::{Error, Result};
use crate::ownership::{Ownage, owning_among, owning_teams};
use crate::types::{ReviewState, Sha};
use std::collections::{BTreeMap, BTreeSet};

/// Static inputs of a review
#[derive(Debug, Clone, Copy)]
pub struct ReviewInput<'a> {
    /// Login of the bot account
    pub bot: &'a str,
    /// Approval rules
    pub rules: &'a Rules,
    /// Registered approvers
    pub approvers: &'a Approvers,
    /// Haters
    pub haters: &'a Haters,
    /// Code ownage read from the reviewed commit
    pub ownage: &'a Ownage,
    /// Whether the review is authored by people
    pub proposition: bool,
    /// Source branch of the review
    pub source: &'a str,
    /// Target branch of the review
    pub target: &'a str,
}

/// One review being resolved
#[derive(Debug, Clone)]
pub struct Review<'a> {
    input: ReviewInput<'a>,
    blockers: Vec<Blocker>,
    /// Status being updated
    pub status: ApprovalStatus,
    /// Users referenced but not registered
    pub unknown_users: BTreeSet<String>,
    /// Teams referenced but not defined
    pub unknown_teams: BTreeSet<String>,
    /// Teams involved by branch or authorship
    pub utility_teams: BTreeSet<String>,
    /// Teams owning the review diff
    pub diff_teams: BTreeSet<String>,
    /// Random reviewer teams triggered by the involved teams
    pub random_teams: BTreeSet<String>,
    /// Review commit to the diff teams it touched
    pub changed_teams: BTreeMap<Sha, BTreeSet<String>>,
    /// Approved commit to the review commits that followed it
    pub child_commits: BTreeMap<Sha, BTreeSet<Sha>>,
}

impl<'a> Review<'a> {
    /// Start resolving `status` under `input`
    pub fn new(input: ReviewInput<'a>, status: ApprovalStatus, blockers: Vec<Blocker>) -> Self {
        let mut review = Self {
            input,
            blockers,
            status,
            unknown_users: BTreeSet::new(),
            unknown_teams: BTreeSet::new(),
            utility_teams: BTreeSet::new(),
            diff_teams: BTreeSet::new(),
            random_teams: BTreeSet::new(),
            changed_teams: BTreeMap::new(),
            child_commits: BTreeMap::new(),
        };
        review.resolve_unknown();
        review.resolve_utility();
        review
    }

    fn resolve_unknown(&mut self) {
        let rules = self.input.rules;
        let haters = self.input.haters;
        self.unknown_users = self
            .status
            .authors
            .iter()
            .chain(self.status.approves.keys())
            .chain(haters.keys())
            .chain(haters.values().flatten())
            .cloned()
            .chain(rules.users())
            .filter(|user| user != self.input.bot && !self.input.approvers.contains_key(user))
            .collect();
        self.unknown_teams = rules.unknown_teams(self.input.ownage);
    }

    fn resolve_utility(&mut self) {
        let rules = self.input.rules;
        let authorship = self
            .input
            .proposition
            .then_some(&rules.authorship)
            .into_iter()
            .flatten()
            .filter(|(_, authors)| !authors.is_disjoint(&self.status.authors))
            .map(|(team, _)| team.clone());
        let source = rules
            .source_branch
            .iter()
            .filter(|(_, criteria)| criteria.is_met(self.input.source))
            .map(|(team, _)| team.clone());
        let target_teams: BTreeSet<String> = rules
            .target_branch
            .iter()
            .filter(|(_, criteria)| criteria.is_met(self.input.target))
            .map(|(team, _)| team.clone())
            .collect();
        self.utility_teams = authorship
            .chain(source)
            .chain(target_teams.iter().cloned())
            .collect();

        if self.status.target != self.input.target {
            self.status.emergent = None;
            self.status.verified = None;
            let approvers: BTreeSet<String> = target_teams
                .iter()
                .filter_map(|team| rules.team(team).ok())
                .flat_map(|team| team.approvers())
                .collect();
            self.status.invalidate(&approvers);
            self.status.target = self.input.target.to_string();
        }
        if !self.utility_teams.is_subset(&self.status.teams) {
            self.status.verified = None;
        }
        self.status.blocked = !self.blockers.is_empty();
    }

    /// Abort on references to unregistered users or undefined teams
    pub fn ensure_known(&self) -> Result<()> {
        if !self.unknown_users.is_empty() {
            return Err(Error::UnknownUsers(
                self.unknown_users.iter().cloned().collect(),
            ));
        }
        if !self.unknown_teams.is_empty() {
            return Err(Error::UnknownTeams(
                self.unknown_teams.iter().cloned().collect(),
            ));
        }
        Ok(())
    }

    /// Record the files the whole review changes
    pub fn resolve_ownage<S: AsRef<str>>(&mut self, diff: &[S]) {
        self.diff_teams = owning_teams(diff, self.input.ownage);
        self.status.teams = self.diff_teams.union(&self.utility_teams).cloned().collect();
        if !self.input.proposition {
            return;
        }
        self.random_teams = self
            .input
            .rules
            .randoms
            .iter()
            .filter(|(_, triggers)| !triggers.is_disjoint(&self.status.teams))
            .map(|(team, _)| team.clone())
            .collect();
        self.status.teams.extend(self.random_teams.iter().cloned());
    }

    /// Record the files one review commit changes
    ///
    /// Empty diffs record nothing. Skipped commits only count for the
    /// sanity team.
    pub fn add_changes<S: AsRef<str>>(&mut self, sha: &Sha, diff: &[S]) {
        if diff.is_empty() {
            return;
        }
        let teams = owning_among(diff, self.input.ownage, &self.diff_teams);
        if self.status.skip.contains(sha) {
            let sanity = self
                .input
                .rules
                .sanity
                .as_ref()
                .filter(|team| self.input.rules.teams.contains_key(*team) && teams.contains(*team));
            if let Some(sanity) = sanity {
                self.changed_teams
                    .insert(sha.clone(), BTreeSet::from([sanity.clone()]));
            }
        } else {
            self.changed_teams.insert(sha.clone(), teams);
        }
    }

    /// Record the review commits following an approved commit
    pub fn add_breakers(&mut self, sha: &Sha, commits: impl IntoIterator<Item = Sha>) {
        self.child_commits
            .insert(sha.clone(), commits.into_iter().collect());
    }

    /// Run the resolution pass against `head`
    pub fn resolve_approval(&mut self, head: &Sha, random: &mut dyn RandomSource) -> ApprovalResult {
        let input = ApprovalInput {
            rules: self.input.rules,
            approvers: self.input.approvers,
            haters: self.input.haters,
            proposition: self.input.proposition,
            diff_teams: &self.diff_teams,
            utility_teams: &self.utility_teams,
            random_teams: &self.random_teams,
            child_commits: &self.child_commits,
            changed_teams: &self.changed_teams,
            blockers: &self.blockers,
        };
        let status = std::mem::replace(
            &mut self.status,
            ApprovalStatus::new(0, "", BTreeSet::new()),
        );
        let (status, result) = engine::resolve_approval(status, &input, head, random);
        self.status = status;
        result
    }

    /// Whether the review may merge in its current GitLab state
    pub fn is_approved(&self, state: &ReviewState) -> bool {
        engine::is_approved(&self.status, state, self.input.approvers)
    }

    /// Active approvers following the review's teams or authors
    pub fn watchers(&self) -> BTreeSet<String> {
        self.input
            .approvers
            .iter()
            .filter(|(_, approver)| approver.active)
            .filter(|(_, approver)| {
                !approver.watch_teams.is_disjoint(&self.status.teams)
                    || !approver.watch_authors.is_disjoint(&self.status.authors)
            })
            .map(|(login, _)| login.clone())
            .collect()
    }

    /// Selected approvers who approved, once the review is verified
    pub fn accepters(&self) -> BTreeSet<String> {
        if self.status.verified.is_none() {
            return BTreeSet::new();
        }
        let approved = self.status.approved_users();
        self.status
            .legates
            .union(&self.status.randoms)
            .filter(|user| approved.contains(*user))
            .cloned()
            .collect()
    }

    /// External blockers found for the review
    pub fn blockers(&self) -> &[Blocker] {
        &self.blockers
    }
}
