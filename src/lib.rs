//! fusion-bot: quorum-gated merge request automation for GitLab
//!
//! The bot runs once per CI job. Each run resolves who still has to approve
//! a merge request, keeps a per-target merge queue, and merges the review
//! at the head of its queue once it is approved and legal to merge. State
//! lives as YAML on a storage branch of the same repository.

pub mod approval;
pub mod auth;
pub mod config;
pub mod criteria;
pub mod error;
pub mod fusion;
pub mod git;
pub mod ownership;
pub mod platform;
pub mod report;
pub mod reviewer;
pub mod storage;
pub mod types;
