//! Quorum-based multi-team approval

pub mod engine;
pub mod review;
pub mod select;
pub mod status;
pub mod team;
