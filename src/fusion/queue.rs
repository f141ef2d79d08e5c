//! Per-target merge queue
//!
//! Only the first review of a target's queue may merge. A review sits in at
//! most one queue; moving it elsewhere removes it from its old queue first.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Target branch to the ordered reviews waiting for it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Queue {
    queue: BTreeMap<String, Vec<u64>>,
    #[serde(skip)]
    changed: bool,
    #[serde(skip)]
    notifiables: BTreeSet<u64>,
}

impl Queue {
    /// Parse the persisted queue asset
    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut queue: Self = serde_yaml::from_str(content)?;
        queue.queue.retain(|_, reviews| !reviews.is_empty());
        Ok(queue)
    }

    /// Render the queue asset, targets sorted
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.queue)?)
    }

    /// Put `review` in the queue of `target`, or in no queue for `None`
    ///
    /// Returns whether the review heads its queue afterwards. Reviews whose
    /// head-of-queue position changed are collected in [`Self::notifiables`].
    pub fn enqueue(&mut self, review: u64, target: Option<&str>) -> bool {
        let mut first = false;
        for (key, reviews) in &mut self.queue {
            if target == Some(key.as_str()) {
                if let Some(position) = reviews.iter().position(|r| *r == review) {
                    first = position == 0;
                    continue;
                }
                reviews.push(review);
                self.changed = true;
                if reviews.first() == Some(&review) {
                    self.notifiables.insert(review);
                    first = true;
                }
            } else {
                let head = reviews.first().copied();
                let before = reviews.len();
                reviews.retain(|r| *r != review);
                if reviews.len() == before {
                    continue;
                }
                self.changed = true;
                if let Some(&next) = reviews.first() {
                    if Some(next) != head {
                        self.notifiables.insert(next);
                    }
                }
            }
        }
        self.queue.retain(|_, reviews| !reviews.is_empty());
        if let Some(target) = target {
            if !self.queue.contains_key(target) {
                self.queue.insert(target.to_string(), vec![review]);
                self.changed = true;
                self.notifiables.insert(review);
                first = true;
            }
        }
        first
    }

    /// Remove `review` from every queue
    pub fn dequeue(&mut self, review: u64) {
        self.enqueue(review, None);
    }

    /// Whether `review` heads the queue of `target`
    pub fn is_first(&self, review: u64, target: &str) -> bool {
        self.queue
            .get(target)
            .and_then(|reviews| reviews.first())
            .is_some_and(|r| *r == review)
    }

    /// Whether `review` waits in any queue
    pub fn is_queued(&self, review: u64) -> bool {
        self.queue.values().any(|reviews| reviews.contains(&review))
    }

    /// Reviews queued for `target`, in order
    pub fn reviews(&self, target: &str) -> &[u64] {
        self.queue.get(target).map_or(&[][..], Vec::as_slice)
    }

    /// Every queued review
    pub fn all_reviews(&self) -> BTreeSet<u64> {
        self.queue.values().flatten().copied().collect()
    }

    /// Whether anything changed since loading
    pub const fn is_changed(&self) -> bool {
        self.changed
    }

    /// Reviews that gained or lost the head of a queue
    pub const fn notifiables(&self) -> &BTreeSet<u64> {
        &self.notifiables
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_enqueue_heads_new_queue() {
        let mut queue = Queue::default();
        assert!(queue.enqueue(7, Some("main")));
        assert!(queue.is_first(7, "main"));
        assert!(queue.is_changed());
        assert_eq!(queue.notifiables(), &BTreeSet::from([7]));
    }

    #[test]
    fn test_second_review_waits() {
        let mut queue = Queue::default();
        queue.enqueue(7, Some("main"));
        assert!(!queue.enqueue(8, Some("main")));
        assert_eq!(queue.reviews("main"), &[7, 8]);
        assert!(!queue.notifiables().contains(&8));
    }

    #[test]
    fn test_retarget_moves_review_and_promotes_next() {
        let mut queue = Queue::from_yaml("main: [7, 8]\n").unwrap();
        assert!(queue.enqueue(7, Some("release")));
        assert_eq!(queue.reviews("main"), &[8]);
        assert!(queue.is_first(7, "release"));
        assert_eq!(queue.notifiables(), &BTreeSet::from([7, 8]));
    }

    #[test]
    fn test_dequeue_drops_empty_target() {
        let mut queue = Queue::from_yaml("main: [7]\n").unwrap();
        queue.dequeue(7);
        assert!(!queue.is_queued(7));
        assert_eq!(queue.to_yaml().unwrap(), "{}\n");
    }

    #[test]
    fn test_yaml_sorted_by_target() {
        let mut queue = Queue::default();
        queue.enqueue(3, Some("release"));
        queue.enqueue(1, Some("main"));
        let yaml = queue.to_yaml().unwrap();
        assert!(yaml.find("main").unwrap() < yaml.find("release").unwrap());
    }
}
