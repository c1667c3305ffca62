//! The merge train aggregate.
//!
//! A train is the ordered set of active cars for one (project, target branch)
//! pair. Train order defines merge order: a car may only merge once every car
//! ahead of it has merged or been removed, and its own validation pipeline
//! reflects the current predecessor state.

mod queue;

pub use queue::{Train, MERGED_HISTORY_LIMIT};
