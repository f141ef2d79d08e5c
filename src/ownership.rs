//! Map changed paths to the teams that own them

use crate::criteria::Criteria;
use std::collections::{BTreeMap, BTreeSet};

/// Team name to path criteria, as loaded from the ownage file
pub type Ownage = BTreeMap<String, Criteria>;

/// Teams owning at least one of `files`
pub fn owning_teams<S: AsRef<str>>(files: &[S], ownage: &Ownage) -> BTreeSet<String> {
    ownage
        .iter()
        .filter(|(_, criteria)| files.iter().any(|f| criteria.is_met(f.as_ref())))
        .map(|(team, _)| team.clone())
        .collect()
}

/// Subset of `candidates` owning at least one of `files`
///
/// Teams missing from `ownage` never match.
pub fn owning_among<S: AsRef<str>>(
    files: &[S],
    ownage: &Ownage,
    candidates: &BTreeSet<String>,
) -> BTreeSet<String> {
    candidates
        .iter()
        .filter(|team| {
            ownage
                .get(*team)
                .is_some_and(|c| files.iter().any(|f| c.is_met(f.as_ref())))
        })
        .cloned()
        .collect()
}
