//! Merge Conductor - merge train orchestration with pluggable auto-merge
//! strategies.
//!
//! This library provides the core domain types and logic: per-branch car
//! queues, the five auto-merge strategy adapters, transactional state
//! mutation, and the asynchronous refresh machinery.

pub mod error;
pub mod hooks;
pub mod refresh;
pub mod server;
pub mod service;
pub mod strategies;
pub mod train;
pub mod types;
pub mod world;

#[cfg(test)]
pub(crate) mod test_utils;
