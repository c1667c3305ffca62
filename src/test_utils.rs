//! Fake collaborators shared across test modules.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::error::PersistenceError;
use crate::hooks::{
    AuditSink, ErrorTracker, Notifier, PermissionGate, SequentialPipelineFactory,
    TrainPipelineFactory,
};
use crate::types::{Car, MergeRequest, MergeRequestId, Pipeline, TrainKey, UserId};
use crate::world::SystemNote;

/// A permission gate that counts how often it is consulted, for memoization
/// assertions.
pub(crate) struct CountingGate {
    allow: bool,
    calls: AtomicUsize,
}

impl CountingGate {
    pub(crate) fn allowing(allow: bool) -> Self {
        CountingGate {
            allow,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PermissionGate for CountingGate {
    fn can_merge(&self, _user: UserId, _merge_request: &MergeRequest) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.allow
    }
}

/// An audit sink that can be switched to fail with a statement timeout,
/// simulating a persistence failure mid-transaction.
#[derive(Default)]
pub(crate) struct FlakyAuditSink {
    failing: AtomicBool,
}

impl FlakyAuditSink {
    pub(crate) fn new() -> Self {
        FlakyAuditSink::default()
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl AuditSink for FlakyAuditSink {
    fn persist_note(&self, _note: &SystemNote) -> Result<(), PersistenceError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(PersistenceError::statement_timeout("system note"))
        } else {
            Ok(())
        }
    }
}

/// Records merge-status notifications.
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    events: Mutex<Vec<MergeRequestId>>,
}

impl RecordingNotifier {
    pub(crate) fn events(&self) -> Vec<MergeRequestId> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Notifier for RecordingNotifier {
    fn merge_status_updated(&self, merge_request: MergeRequestId) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(merge_request);
    }
}

/// Records captured errors with their merge-request context.
#[derive(Default)]
pub(crate) struct RecordingTracker {
    captured: Mutex<Vec<(MergeRequestId, String)>>,
}

impl RecordingTracker {
    pub(crate) fn captured(&self) -> Vec<(MergeRequestId, String)> {
        self.captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ErrorTracker for RecordingTracker {
    fn capture(&self, merge_request: MergeRequestId, error: &PersistenceError) {
        self.captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((merge_request, error.to_string()));
    }
}

/// A pipeline factory that can be told to decline, for exercising the
/// cars-stay-stale path.
pub(crate) struct TogglePipelineFactory {
    inner: SequentialPipelineFactory,
    enabled: AtomicBool,
}

impl TogglePipelineFactory {
    pub(crate) fn new() -> Self {
        TogglePipelineFactory {
            inner: SequentialPipelineFactory::new(true),
            enabled: AtomicBool::new(true),
        }
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}

impl TrainPipelineFactory for TogglePipelineFactory {
    fn create(
        &self,
        merge_request: &MergeRequest,
        key: &TrainKey,
        predecessor: Option<&Car>,
    ) -> Result<Option<Pipeline>, PersistenceError> {
        if !self.enabled.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.create(merge_request, key, predecessor)
    }
}
