//! Incremental file synchronization
//!
//! Listing and diffing build an immutable [`SyncPlan`]; execution streams
//! the plan through a bounded worker pool. Deletions only ever come from
//! a real destination listing, never from the trust cache alone.

pub mod engine;
pub mod plan;

pub use engine::{execute_plan, SyncOptions, SyncOutcome};
pub use plan::{build_plan, DestinationView, SyncPlan};
