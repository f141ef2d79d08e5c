//! Merge workflow: review kinds, queue, legality checks and updates
//!
//! Updates follow a three-phase pattern:
//! 1. Gather - resolve approvals and run checks (effectful, bounded)
//! 2. Plan - create `UpdatePlan` (pure, testable)
//! 3. Execute - label, queue, normalize and merge (effectful)

pub mod check;
mod execute;
pub mod merge;
mod plan;
pub mod queue;

pub use execute::{UpdateExecution, UpdateTarget, execute_update};
pub use plan::{Mode, Phase, UpdateFacts, UpdatePlan, UpdateStep, create_update_plan};
