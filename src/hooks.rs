//! Collaborator interfaces at the boundary of the core.
//!
//! The surrounding system supplies facts (feature flags, licenses, user
//! permissions) and consumes side effects (audit notes, pipeline creation,
//! error reports). Each crossing is a trait so it can be faked in tests; in
//! particular, [`AuditSink`] failures are how tests exercise the
//! transactional rollback path.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::PersistenceError;
use crate::types::{
    Car, MergeRequest, MergeRequestId, Pipeline, PipelineId, PipelineStatus, Sha, TrainKey, UserId,
};
use crate::world::SystemNote;

/// Feature flag gating the "when checks pass" strategy pair. When set, the
/// checks-pass flavors replace the pipeline-succeeds flavors.
pub const FEATURE_MERGE_WHEN_CHECKS_PASS: &str = "merge_when_checks_pass";

/// Project-level toggle for merge trains.
pub const FEATURE_MERGE_TRAINS: &str = "merge_trains";

/// License for merge trains.
pub const LICENSE_MERGE_TRAINS: &str = "merge_trains";

/// License for the blocking-merge-requests check.
pub const LICENSE_BLOCKING_MERGE_REQUESTS: &str = "blocking_merge_requests";

/// Ambient feature-flag and license lookups, injected rather than global.
pub trait CapabilitiesProvider: Send + Sync {
    fn feature_enabled(&self, name: &str) -> bool;
    fn licensed(&self, name: &str) -> bool;
}

/// A static capability set. The production wiring builds one from
/// configuration; tests build whatever combination they need.
#[derive(Debug, Default)]
pub struct StaticCapabilities {
    features: HashSet<String>,
    licenses: HashSet<String>,
}

impl StaticCapabilities {
    pub fn new() -> Self {
        StaticCapabilities::default()
    }

    pub fn with_feature(mut self, name: &str) -> Self {
        self.features.insert(name.to_string());
        self
    }

    pub fn with_license(mut self, name: &str) -> Self {
        self.licenses.insert(name.to_string());
        self
    }

    /// Everything enabled except the checks-pass toggle: the common
    /// production baseline.
    pub fn trains_enabled() -> Self {
        StaticCapabilities::new()
            .with_feature(FEATURE_MERGE_TRAINS)
            .with_license(LICENSE_MERGE_TRAINS)
            .with_license(LICENSE_BLOCKING_MERGE_REQUESTS)
    }
}

impl CapabilitiesProvider for StaticCapabilities {
    fn feature_enabled(&self, name: &str) -> bool {
        self.features.contains(name)
    }

    fn licensed(&self, name: &str) -> bool {
        self.licenses.contains(name)
    }
}

/// Permission facts. `can_merge` is the expensive check the strategies
/// memoize within a single availability evaluation.
pub trait PermissionGate: Send + Sync {
    fn can_merge(&self, user: UserId, merge_request: &MergeRequest) -> bool;
}

/// Grants everyone merge rights. Useful for wiring and for tests that are
/// not about permissions.
#[derive(Debug, Default)]
pub struct PermitAll;

impl PermissionGate for PermitAll {
    fn can_merge(&self, _user: UserId, _merge_request: &MergeRequest) -> bool {
        true
    }
}

/// The fallible audit step of each transactional operation.
///
/// The service persists the note into the world only after this hook
/// returns `Ok`; an error rolls the whole operation back.
pub trait AuditSink: Send + Sync {
    fn persist_note(&self, note: &SystemNote) -> Result<(), PersistenceError>;
}

/// An audit sink that always succeeds.
#[derive(Debug, Default)]
pub struct AlwaysOkAudit;

impl AuditSink for AlwaysOkAudit {
    fn persist_note(&self, _note: &SystemNote) -> Result<(), PersistenceError> {
        Ok(())
    }
}

/// Push-notification surface, fired when an auto-merge is aborted so
/// downstream views can re-query the merge status.
pub trait Notifier: Send + Sync {
    fn merge_status_updated(&self, merge_request: MergeRequestId);
}

/// A notifier that drops notifications.
#[derive(Debug, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn merge_status_updated(&self, _merge_request: MergeRequestId) {}
}

/// Creates validation pipelines for train cars.
///
/// Pipeline execution is out-of-band; this hook only requests creation. A
/// factory may decline (`Ok(None)`) when a pipeline cannot be created yet —
/// the car then stays stale until a later refresh.
pub trait TrainPipelineFactory: Send + Sync {
    fn create(
        &self,
        merge_request: &MergeRequest,
        key: &TrainKey,
        predecessor: Option<&Car>,
    ) -> Result<Option<Pipeline>, PersistenceError>;
}

/// Mints running pipelines with sequential ids. The default production
/// wiring until a real CI integration is plugged in.
#[derive(Debug)]
pub struct SequentialPipelineFactory {
    next_id: AtomicU64,
    cooperative_cancellation: bool,
}

impl SequentialPipelineFactory {
    pub fn new(cooperative_cancellation: bool) -> Self {
        SequentialPipelineFactory {
            next_id: AtomicU64::new(1),
            cooperative_cancellation,
        }
    }

    fn synthetic_train_ref(merge_request: MergeRequestId, pipeline: PipelineId) -> Sha {
        // A placeholder for the speculative merge commit; real integrations
        // supply the actual train ref.
        Sha::new(format!("{:020x}{:020x}", merge_request.0, pipeline.0))
    }
}

impl TrainPipelineFactory for SequentialPipelineFactory {
    fn create(
        &self,
        merge_request: &MergeRequest,
        _key: &TrainKey,
        _predecessor: Option<&Car>,
    ) -> Result<Option<Pipeline>, PersistenceError> {
        let id = PipelineId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let sha = Self::synthetic_train_ref(merge_request.id, id);
        let mut pipeline = Pipeline::new(id, sha, PipelineStatus::Running);
        pipeline.cooperative_cancellation = self.cooperative_cancellation;
        Ok(Some(pipeline))
    }
}

/// Diagnostics sink for transient persistence failures, always invoked with
/// the merge request id for context.
pub trait ErrorTracker: Send + Sync {
    fn capture(&self, merge_request: MergeRequestId, error: &PersistenceError);
}

/// Reports captured errors through `tracing`.
#[derive(Debug, Default)]
pub struct TracingTracker;

impl ErrorTracker for TracingTracker {
    fn capture(&self, merge_request: MergeRequestId, error: &PersistenceError) {
        tracing::error!(
            merge_request_id = merge_request.0,
            error = %error,
            "transient persistence failure"
        );
    }
}
