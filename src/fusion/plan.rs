//! Update planning - pure functions deciding what an update does
//!
//! This module contains the pure, testable logic of the review state
//! machine. No I/O happens here: the caller gathers the facts, the plan
//! says which effects follow, and `execute_update()` performs them.

use crate::approval::engine::ApprovalResult;
use crate::fusion::check::Problem;
use std::collections::BTreeSet;

/// Operation driving the update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Keep the review's queue position current
    Enqueue,
    /// Also merge the review when it is ready
    Accept,
}

/// Where the review stands after resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Problems prevent any merge
    Stopped,
    /// Approvals are still missing
    Waiting,
    /// Approved and legal to merge
    Ready,
}

/// Facts gathered before planning
#[derive(Debug, Clone, Copy)]
pub struct UpdateFacts<'a> {
    /// Driving operation
    pub mode: Mode,
    /// Merge-legality problems
    pub problems: &'a [Problem],
    /// Resolution outcome
    pub result: &'a ApprovalResult,
    /// Whether the mergeability predicate holds
    pub approved: bool,
    /// Labels currently on the review
    pub labels: &'a BTreeSet<String>,
    /// Award to post once the review is approved
    pub award: Option<&'a str>,
    /// Whether the bot already posted the award
    pub awarded: bool,
    /// Whether the head already has the shape acceptance requires
    pub normalized: bool,
}

/// A single step in the update plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateStep {
    /// Adjust review labels
    SetLabels {
        /// Labels to add
        add: BTreeSet<String>,
        /// Labels to remove
        remove: BTreeSet<String>,
    },
    /// Post the approval award
    PostAward(String),
    /// Put the review in its target's queue
    Enqueue,
    /// Take the review out of every queue
    Dequeue,
    /// Rewrite the head into the shape acceptance requires
    Normalize,
    /// Merge through GitLab
    Merge,
}

impl std::fmt::Display for UpdateStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SetLabels { add, remove } => {
                write!(f, "labels +{add:?} -{remove:?}")
            }
            Self::PostAward(name) => write!(f, "award :{name}:"),
            Self::Enqueue => write!(f, "enqueue"),
            Self::Dequeue => write!(f, "dequeue"),
            Self::Normalize => write!(f, "normalize"),
            Self::Merge => write!(f, "merge"),
        }
    }
}

/// Update plan - the functional core output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePlan {
    /// Where the review stands
    pub phase: Phase,
    /// Ordered steps to perform
    pub steps: Vec<UpdateStep>,
}

impl UpdatePlan {
    /// Whether the plan ends in a merge
    #[must_use]
    pub fn merges(&self) -> bool {
        self.steps.contains(&UpdateStep::Merge)
    }
}

/// Create an update plan (PURE - no I/O, easily testable)
#[must_use]
pub fn create_update_plan(facts: &UpdateFacts<'_>) -> UpdatePlan {
    let mut steps = Vec::new();

    let add: BTreeSet<String> = facts.result.add_labels.difference(facts.labels).cloned().collect();
    let remove: BTreeSet<String> = facts.result.del_labels.intersection(facts.labels).cloned().collect();
    if !add.is_empty() || !remove.is_empty() {
        steps.push(UpdateStep::SetLabels { add, remove });
    }
    if facts.result.state.is_approved() && !facts.awarded {
        if let Some(award) = facts.award {
            steps.push(UpdateStep::PostAward(award.to_string()));
        }
    }

    let phase = if !facts.problems.is_empty() {
        Phase::Stopped
    } else if facts.approved {
        Phase::Ready
    } else {
        Phase::Waiting
    };

    if phase == Phase::Ready {
        steps.push(UpdateStep::Enqueue);
        if !facts.normalized {
            steps.push(UpdateStep::Normalize);
        } else if facts.mode == Mode::Accept {
            steps.push(UpdateStep::Merge);
        }
    } else {
        steps.push(UpdateStep::Dequeue);
    }

    UpdatePlan { phase, steps }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::engine::ApprovalState;
    use std::collections::BTreeMap;

    fn result(state: ApprovalState) -> ApprovalResult {
        ApprovalResult {
            state,
            blockers: vec![],
            orphaned: false,
            unapprovable: BTreeSet::new(),
            add_labels: BTreeSet::from(["core".to_string()]),
            del_labels: BTreeSet::from(["web".to_string(), "qa".to_string()]),
            holders: BTreeSet::new(),
            slackers: BTreeSet::new(),
            approvers: BTreeSet::new(),
            outdaters: BTreeMap::new(),
        }
    }

    fn facts<'a>(
        mode: Mode,
        result: &'a ApprovalResult,
        labels: &'a BTreeSet<String>,
        problems: &'a [Problem],
    ) -> UpdateFacts<'a> {
        UpdateFacts {
            mode,
            problems,
            result,
            approved: result.state.is_approved(),
            labels,
            award: Some("white_check_mark"),
            awarded: false,
            normalized: true,
        }
    }

    #[test]
    fn test_label_delta() {
        let result = result(ApprovalState::Slackers);
        let labels = BTreeSet::from(["web".to_string(), "core".to_string()]);
        let plan = create_update_plan(&facts(Mode::Enqueue, &result, &labels, &[]));
        assert_eq!(plan.phase, Phase::Waiting);
        assert_eq!(
            plan.steps,
            vec![
                UpdateStep::SetLabels {
                    add: BTreeSet::new(),
                    remove: BTreeSet::from(["web".to_string()]),
                },
                UpdateStep::Dequeue,
            ]
        );
    }

    #[test]
    fn test_ready_accept_merges() {
        let result = result(ApprovalState::Approved);
        let labels = BTreeSet::from(["core".to_string()]);
        let plan = create_update_plan(&facts(Mode::Accept, &result, &labels, &[]));
        assert_eq!(plan.phase, Phase::Ready);
        assert_eq!(
            plan.steps,
            vec![
                UpdateStep::PostAward("white_check_mark".to_string()),
                UpdateStep::Enqueue,
                UpdateStep::Merge,
            ]
        );
        assert!(plan.merges());
    }

    #[test]
    fn test_ready_enqueue_does_not_merge() {
        let result = result(ApprovalState::Emergent);
        let labels = BTreeSet::from(["core".to_string()]);
        let mut facts = facts(Mode::Enqueue, &result, &labels, &[]);
        facts.awarded = true;
        let plan = create_update_plan(&facts);
        assert_eq!(plan.steps, vec![UpdateStep::Enqueue]);
    }

    #[test]
    fn test_unnormalized_head_is_rewritten_before_merge() {
        let result = result(ApprovalState::Approved);
        let labels = BTreeSet::from(["core".to_string()]);
        let mut facts = facts(Mode::Accept, &result, &labels, &[]);
        facts.normalized = false;
        facts.award = None;
        let plan = create_update_plan(&facts);
        assert_eq!(plan.steps, vec![UpdateStep::Enqueue, UpdateStep::Normalize]);
        assert!(!plan.merges());
    }

    #[test]
    fn test_problems_stop_even_approved_reviews() {
        let result = result(ApprovalState::Approved);
        let labels = BTreeSet::from(["core".to_string()]);
        let problems = [Problem::NotCherry];
        let plan = create_update_plan(&facts(Mode::Accept, &result, &labels, &problems));
        assert_eq!(plan.phase, Phase::Stopped);
        assert_eq!(plan.steps.last(), Some(&UpdateStep::Dequeue));
        assert!(!plan.merges());
    }
}
