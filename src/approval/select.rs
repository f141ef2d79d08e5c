//! Weighted approver selection
//!
//! Selection alternates two phases until no team needs anyone: first every
//! user some team cannot do without is taken, then one user is drawn by
//! lottery, weighted by how many teams still need them times their
//! configured weight. After each step every team is narrowed by all users
//! picked so far, so a user shared by several teams satisfies all of them
//! at once.

use crate::approval::team::{Rule, Team};
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet};

/// Source of uniform random numbers
pub trait RandomSource {
    /// Uniform value in `0..n`; callers never pass zero
    fn next_in_range(&mut self, n: u64) -> u64;
}

/// Production source backed by the thread-local RNG
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_in_range(&mut self, n: u64) -> u64 {
        rand::thread_rng().gen_range(0..n)
    }
}

/// Replays a fixed sequence, reduced modulo the requested range
#[derive(Debug, Clone, Default)]
pub struct SequenceRandom {
    values: Vec<u64>,
    next: usize,
}

impl SequenceRandom {
    /// Cycle through `values`; an empty sequence always yields zero
    pub fn new(values: impl Into<Vec<u64>>) -> Self {
        Self {
            values: values.into(),
            next: 0,
        }
    }
}

impl RandomSource for SequenceRandom {
    fn next_in_range(&mut self, n: u64) -> u64 {
        if self.values.is_empty() {
            return 0;
        }
        let value = self.values[self.next % self.values.len()];
        self.next += 1;
        value % n
    }
}

/// Per-user lottery weights
#[derive(Debug, Clone, Copy)]
pub struct Weights<'a> {
    /// Configured weights by login
    pub users: &'a BTreeMap<String, u64>,
    /// Weight of users without an entry
    pub base: u64,
}

impl Weights<'_> {
    fn of(&self, user: &str) -> u64 {
        self.users.get(user).copied().unwrap_or(self.base)
    }
}

/// Outcome of a selection pass
#[derive(Debug, Clone)]
pub struct Selected {
    /// Teams narrowed by every pick; a positive quorum means unsatisfiable
    pub teams: Vec<Team>,
    /// Users picked
    pub users: BTreeSet<String>,
}

fn involve(teams: Vec<Team>, users: &BTreeSet<String>) -> Vec<Team> {
    teams
        .into_iter()
        .map(|team| team.apply(Rule::Involved(users)))
        .collect()
}

fn pool(team: &Team) -> impl Iterator<Item = &String> {
    team.required
        .iter()
        .chain(&team.optional)
        .chain(&team.reserve)
        .chain(&team.random)
}

fn draw(needs: &BTreeMap<String, u64>, weights: Weights<'_>, random: &mut dyn RandomSource) -> Option<String> {
    let weighted: Vec<(&String, u64)> = needs
        .iter()
        .map(|(user, count)| (user, count.saturating_mul(weights.of(user))))
        .collect();
    let total: u64 = weighted.iter().map(|(_, w)| *w).sum();
    if total == 0 {
        let index = random.next_in_range(needs.len() as u64);
        return needs
            .keys()
            .nth(usize::try_from(index).unwrap_or_default())
            .cloned();
    }
    let mut left = random.next_in_range(total);
    for (user, weight) in weighted {
        if left < weight {
            return Some(user.clone());
        }
        left -= weight;
    }
    None
}

/// Pick users until no team needs anyone more
pub fn select_users(
    mut teams: Vec<Team>,
    weights: Weights<'_>,
    random: &mut dyn RandomSource,
) -> Selected {
    let mut users = BTreeSet::new();
    loop {
        loop {
            let necessary: BTreeSet<String> = teams.iter().flat_map(Team::necessary).collect();
            if necessary.is_empty() {
                break;
            }
            users.extend(necessary);
            teams = involve(teams, &users);
        }
        let mut needs = BTreeMap::new();
        for user in teams.iter().flat_map(pool) {
            if needs.contains_key(user) {
                continue;
            }
            let count = teams.iter().filter(|t| t.is_needed(user)).count() as u64;
            if count > 0 {
                needs.insert(user.clone(), count);
            }
        }
        if needs.is_empty() {
            return Selected { teams, users };
        }
        let Some(user) = draw(&needs, weights, random) else {
            return Selected { teams, users };
        };
        users.insert(user);
        teams = involve(teams, &users);
    }
}
