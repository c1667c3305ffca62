//! Core domain types for merge train orchestration.

mod car;
mod ids;
mod intent;
mod merge_request;
mod pipeline;

pub use car::{Car, CarStatus, CarValidation};
pub use ids::{MergeRequestId, PipelineId, ProjectId, Sha, TrainKey, UserId};
pub use intent::{AutoMergeIntent, StrategyKind};
pub use merge_request::{MergeRequest, MergeStatus};
pub use pipeline::{Job, JobStatus, Pipeline, PipelineStatus};
