//! Approval resolution engine
//!
//! Turns a persisted [`ApprovalStatus`] plus the current review facts into an
//! updated status and an [`ApprovalResult`]. The pass runs in a fixed order:
//! bypass validation, breaker invalidation, legate selection, random
//! reviewer selection, then classification. Everything here is pure apart
//! from the injected [`RandomSource`].

use crate::approval::select::{RandomSource, Weights, select_users};
use crate::approval::status::{ApprovalStatus, Resolution};
use crate::approval::team::{Rule, Selection, Team};
use crate::config::{Approvers, Haters, Rules};
use crate::types::{ReviewState, Sha};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Condition external to approvals that holds the merge
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Blocker {
    /// Review is marked draft
    Draft,
    /// Title carries a WIP marker
    WorkInProgress,
    /// Blocking discussions are unresolved
    Discussions,
    /// Squash flag does not match the review kind
    SquashStatus,
    /// Title does not satisfy the proposition rule
    BadTitle,
}

/// Overall approval state, in classification priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    /// External blockers present
    Blocked,
    /// Operator bypass in force
    Emergent,
    /// Quorum cannot be reached with available approvers
    Unapprovable,
    /// Selected approvers have not decided yet
    Slackers,
    /// Selected approvers' decisions were invalidated
    Outdaters,
    /// Someone holds the merge
    Holders,
    /// Only authors hold the merge
    Authors,
    /// Ready to merge
    Approved,
}

impl ApprovalState {
    /// Whether the state lets the review merge
    pub const fn is_approved(self) -> bool {
        matches!(self, Self::Emergent | Self::Approved)
    }
}

impl std::fmt::Display for ApprovalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Blocked => "blocked",
            Self::Emergent => "emergent",
            Self::Unapprovable => "unapprovable",
            Self::Slackers => "slackers",
            Self::Outdaters => "outdaters",
            Self::Holders => "holders",
            Self::Authors => "authors",
            Self::Approved => "approved",
        };
        f.write_str(name)
    }
}

/// Outcome of a resolution pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApprovalResult {
    /// Classified state
    pub state: ApprovalState,
    /// External blockers
    pub blockers: Vec<Blocker>,
    /// No author is usable any more
    pub orphaned: bool,
    /// Teams whose quorum cannot be reached
    pub unapprovable: BTreeSet<String>,
    /// Labels to set
    pub add_labels: BTreeSet<String>,
    /// Labels to remove
    pub del_labels: BTreeSet<String>,
    /// Users holding the merge
    pub holders: BTreeSet<String>,
    /// Selected users without a decision
    pub slackers: BTreeSet<String>,
    /// Selected users who approved
    pub approvers: BTreeSet<String>,
    /// Outdated decisions by the commit they were pinned to
    pub outdaters: BTreeMap<Sha, BTreeSet<String>>,
}

/// Facts a resolution pass runs against
#[derive(Debug, Clone, Copy)]
pub struct ApprovalInput<'a> {
    /// Approval rules
    pub rules: &'a Rules,
    /// Registered approvers
    pub approvers: &'a Approvers,
    /// Users never assigned as random reviewers of given authors
    pub haters: &'a Haters,
    /// Whether the review is a proposition (authored by a person)
    pub proposition: bool,
    /// Teams owning the review diff
    pub diff_teams: &'a BTreeSet<String>,
    /// Teams involved by branch or authorship
    pub utility_teams: &'a BTreeSet<String>,
    /// Random reviewer teams
    pub random_teams: &'a BTreeSet<String>,
    /// Approved commit to the review commits that followed it
    pub child_commits: &'a BTreeMap<Sha, BTreeSet<Sha>>,
    /// Review commit to the teams its diff touched
    pub changed_teams: &'a BTreeMap<Sha, BTreeSet<String>>,
    /// External blockers
    pub blockers: &'a [Blocker],
}

fn teams<'a>(rules: &Rules, names: impl IntoIterator<Item = &'a String>) -> Vec<Team> {
    names
        .into_iter()
        .filter_map(|name| rules.teams.get(name).map(|config| Team::new(name, config)))
        .collect()
}

fn active_users(approvers: &Approvers) -> BTreeSet<String> {
    approvers
        .iter()
        .filter(|(_, approver)| approver.active)
        .map(|(login, _)| login.clone())
        .collect()
}

fn emergent_survives(input: &ApprovalInput<'_>, emergent: &Sha, head: &Sha) -> bool {
    input.child_commits.get(emergent).map_or(emergent == head, |childs| {
        !childs.iter().any(|c| input.changed_teams.contains_key(c))
    })
}

/// Invalidate approvals broken by later commits
fn invalidate_broken(status: &mut ApprovalStatus, input: &ApprovalInput<'_>) {
    let utility = teams(input.rules, input.utility_teams);
    let randoms = teams(input.rules, input.random_teams);
    let mut fragile: BTreeSet<String> = status.authors.clone();
    fragile.extend(
        utility
            .iter()
            .filter(|t| !t.advance_approval)
            .flat_map(Team::approvers),
    );
    fragile.extend(
        randoms
            .iter()
            .filter(|t| !t.advance_approval)
            .flat_map(|t| t.random.intersection(&status.randoms).cloned()),
    );
    fragile.extend(status.users_with(Resolution::Fragile));
    let diff_approvers: BTreeMap<String, BTreeSet<String>> = teams(input.rules, input.diff_teams)
        .into_iter()
        .filter(|t| !t.advance_approval)
        .map(|t| {
            let approvers = t.approvers();
            (t.name, approvers)
        })
        .collect();

    for (sha, childs) in input.child_commits {
        let breakers: Vec<&BTreeSet<String>> = childs
            .iter()
            .filter_map(|c| input.changed_teams.get(c))
            .collect();
        if breakers.is_empty() {
            continue;
        }
        let mut broken = fragile.clone();
        for team in breakers.into_iter().flatten() {
            if let Some(approvers) = diff_approvers.get(team) {
                broken.extend(approvers.iter().cloned());
            }
        }
        let pinned: BTreeSet<String> = status
            .approves
            .values()
            .filter(|a| &a.commit == sha && a.resolution.is_approved())
            .map(|a| a.approver.clone())
            .collect();
        let invalid: BTreeSet<String> = broken.intersection(&pinned).cloned().collect();
        status.invalidate(&invalid);
    }
}

/// Run one resolution pass against `head`
pub fn resolve_approval(
    mut status: ApprovalStatus,
    input: &ApprovalInput<'_>,
    head: &Sha,
    random: &mut dyn RandomSource,
) -> (ApprovalStatus, ApprovalResult) {
    if let Some(emergent) = status.emergent.take() {
        if emergent_survives(input, &emergent, head) {
            status.emergent = Some(head.clone());
        }
    }
    invalidate_broken(&mut status, input);

    let active = active_users(input.approvers);
    let approved = status.approved_users();
    let yet_active: BTreeSet<String> = active.union(&approved).cloned().collect();

    let mut legate_rules = vec![Rule::Mode(Selection::Legates), Rule::Active(&yet_active)];
    if input.proposition {
        legate_rules.push(Rule::Exclude(&status.authors));
    }
    let legates: Vec<Team> = teams(input.rules, input.utility_teams.union(input.diff_teams))
        .into_iter()
        .map(|t| t.apply_all(legate_rules.iter().copied()))
        .collect();
    let legate_pool: BTreeSet<String> = legates.iter().flat_map(Team::approvers).collect();
    status.legates = legate_pool.intersection(&status.legates).cloned().collect();

    let haters: BTreeSet<String> = input
        .haters
        .iter()
        .filter(|(_, authors)| !authors.is_disjoint(&status.authors))
        .map(|(hater, _)| hater.clone())
        .collect();
    let random_rules = [
        Rule::Mode(Selection::Randoms),
        Rule::Active(&yet_active),
        Rule::Exclude(&status.authors),
        Rule::Exclude(&haters),
    ];
    let randoms: Vec<Team> = teams(input.rules, input.random_teams)
        .into_iter()
        .map(|t| t.apply_all(random_rules))
        .collect();
    let random_pool: BTreeSet<String> = randoms.iter().flat_map(|t| t.random.clone()).collect();
    status.randoms = random_pool.intersection(&status.randoms).cloned().collect();

    let mut involved: BTreeSet<String> = status.legates.union(&status.randoms).cloned().collect();
    if !input.proposition {
        involved.extend(status.authors.iter().cloned());
    }
    let weights = Weights {
        users: &input.rules.weights,
        base: input.rules.base_weight,
    };
    let legates: Vec<Team> = legates
        .into_iter()
        .map(|t| t.apply(Rule::Involved(&involved)))
        .collect();
    let selected = select_users(legates, weights, random);
    status.legates.extend(selected.users);
    let legates = selected.teams;

    let involved = status.randoms.clone();
    let randoms: Vec<Team> = randoms
        .into_iter()
        .map(|t| t.apply_all([Rule::Exclude(&status.legates), Rule::Involved(&involved)]))
        .collect();
    let selected = select_users(randoms, weights, random);
    status.randoms.extend(selected.users);

    let selected: BTreeSet<String> = status.legates.union(&status.randoms).cloned().collect();
    let add_labels: BTreeSet<String> = teams(input.rules, &status.teams)
        .into_iter()
        .flat_map(|t| t.labels)
        .collect();
    let del_labels: BTreeSet<String> = input
        .rules
        .teams
        .values()
        .flat_map(|t| t.labels.iter().cloned())
        .filter(|label| !add_labels.contains(label))
        .collect();
    let mut holders: BTreeSet<String> = status.authors.difference(&approved).cloned().collect();
    holders.extend(status.blocking_users());
    let holders: BTreeSet<String> = holders.intersection(&active).cloned().collect();
    let mut outdaters: BTreeMap<Sha, BTreeSet<String>> = BTreeMap::new();
    for user in &selected {
        if let Some(approve) = status.approves.get(user) {
            if approve.resolution == Resolution::Outdated {
                outdaters
                    .entry(approve.commit.clone())
                    .or_default()
                    .insert(user.clone());
            }
        }
    }
    let orphaned = status.authors.is_disjoint(&yet_active);
    let unapprovable: BTreeSet<String> = legates
        .iter()
        .filter(|t| t.quorum > 0)
        .map(|t| t.name.clone())
        .collect();
    let slackers: BTreeSet<String> = selected
        .iter()
        .filter(|u| !status.approves.contains_key(*u))
        .cloned()
        .collect();
    let approvers: BTreeSet<String> = selected.intersection(&approved).cloned().collect();

    status.verified =
        (unapprovable.is_empty() && input.blockers.is_empty() && !orphaned).then(|| head.clone());

    let state = if !input.blockers.is_empty() {
        ApprovalState::Blocked
    } else if status.emergent.is_some() {
        ApprovalState::Emergent
    } else if status.verified.is_none() {
        ApprovalState::Unapprovable
    } else if !slackers.is_empty() {
        ApprovalState::Slackers
    } else if !outdaters.is_empty() {
        ApprovalState::Outdaters
    } else if !holders.is_empty() {
        if holders.is_subset(&status.authors) {
            ApprovalState::Authors
        } else {
            ApprovalState::Holders
        }
    } else {
        ApprovalState::Approved
    };

    let result = ApprovalResult {
        state,
        blockers: input.blockers.to_vec(),
        orphaned,
        unapprovable,
        add_labels,
        del_labels,
        holders,
        slackers,
        approvers,
        outdaters,
    };
    (status, result)
}

/// Whether the review may be merged as it stands
///
/// A blocked status never merges, not even under an operator bypass.
pub fn is_approved(status: &ApprovalStatus, review: &ReviewState, approvers: &Approvers) -> bool {
    if status.blocked || status.target != review.target_branch {
        return false;
    }
    let Ok(head) = review.head() else {
        return false;
    };
    if status.emergent.as_ref() == Some(&head) {
        return true;
    }
    if status.verified.as_ref() != Some(&head) {
        return false;
    }
    let active = active_users(approvers);
    if !status.blocking_users().is_disjoint(&active) {
        return false;
    }
    let approved = status.approved_users();
    status
        .authors
        .intersection(&active)
        .chain(&status.randoms)
        .chain(&status.legates)
        .all(|user| approved.contains(user))
}
