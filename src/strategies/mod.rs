//! Auto-merge strategy adapters.
//!
//! Five strategies share one contract: `available_for` (pure eligibility),
//! `execute` (arm), `process` (react to a trigger), `cancel` (user-initiated
//! disarm), `abort` (system-initiated disarm with a reason). The
//! pipeline-succeeds and checks-pass flavors are mutually exclusive pairs
//! selected by the `merge_when_checks_pass` feature flag: exactly one of each
//! pair is ever available.

use std::sync::Arc;
use std::sync::OnceLock;

use crate::hooks::{
    CapabilitiesProvider, PermissionGate, FEATURE_MERGE_TRAINS, FEATURE_MERGE_WHEN_CHECKS_PASS,
    LICENSE_BLOCKING_MERGE_REQUESTS, LICENSE_MERGE_TRAINS,
};
use crate::service::AutoMergeService;
use crate::types::{MergeRequest, MergeRequestId, StrategyKind, UserId};
use crate::world::WorldState;

mod add_when_checks_pass;
mod add_when_pipeline_succeeds;
mod merge_train;
mod merge_when_checks_pass;
mod merge_when_pipeline_succeeds;

pub use add_when_checks_pass::AddToTrainWhenChecksPass;
pub use add_when_pipeline_succeeds::AddToTrainWhenPipelineSucceeds;
pub use merge_train::MergeTrainStrategy;
pub use merge_when_checks_pass::MergeWhenChecksPass;
pub use merge_when_pipeline_succeeds::MergeWhenPipelineSucceeds;

/// Result of `execute`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteOutcome {
    /// The intent was armed (and, for the merge-train strategy, a car was
    /// enqueued at `position`).
    Armed {
        strategy: StrategyKind,
        position: Option<usize>,
    },

    /// The strategy's preconditions do not hold for this merge request.
    Unavailable,

    /// A persistence step failed; every state change was rolled back.
    Failed,
}

/// Result of `process`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The merge request was merged.
    Merged,

    /// An add-to-train strategy handed the merge request over to the train.
    AddedToTrain { position: usize },

    /// The trigger condition is not satisfied yet; nothing changed.
    Pending,

    /// The strategy became unavailable at process time; the auto-merge was
    /// aborted with `reason`.
    Aborted { reason: String },

    /// No auto-merge is armed for this merge request.
    NotArmed,
}

/// Result of `cancel`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    Canceled,
    NotArmed,
    /// A persistence step failed; every state change was rolled back.
    Error { message: String },
}

/// Result of `abort`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortOutcome {
    Aborted,
    NotArmed,
    /// A persistence step failed; every state change was rolled back.
    Error { message: String },
}

/// The uniform strategy contract.
///
/// `cancel` and `abort` are strategy-independent (they undo whatever the
/// armed strategy set up), so the trait supplies them.
pub trait AutoMergeStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Pure eligibility check. Must not mutate state; the permission lookup
    /// is memoized so repeated calls on one adapter instance hit the gate at
    /// most once.
    fn available_for(&self, world: &WorldState, merge_request: &MergeRequest, user: UserId)
        -> bool;

    /// Arms the strategy for the merge request.
    fn execute(
        &self,
        service: &AutoMergeService,
        merge_request: MergeRequestId,
        user: UserId,
    ) -> ExecuteOutcome;

    /// Reacts to a trigger event (pipeline completion, mergeability check
    /// result, train movement).
    fn process(&self, service: &AutoMergeService, merge_request: MergeRequestId) -> ProcessOutcome;

    /// User-initiated disarm: clears the intent and any car, emits a cancel
    /// note, schedules a refresh. No todo, no reason.
    fn cancel(&self, service: &AutoMergeService, merge_request: MergeRequestId) -> CancelOutcome {
        service.cancel_auto_merge(merge_request)
    }

    /// System-initiated disarm with a human-readable reason: additionally
    /// cancels in-flight validation jobs, creates a todo for the author, and
    /// fires the merge-status notification.
    fn abort(
        &self,
        service: &AutoMergeService,
        merge_request: MergeRequestId,
        reason: &str,
        process_next: bool,
    ) -> AbortOutcome {
        service.abort_auto_merge(merge_request, reason, process_next)
    }
}

/// Reason used when an add-to-train strategy fires but the merge-train
/// strategy is unavailable at that moment.
pub(crate) const CANNOT_ADD_REASON: &str =
    "this merge request cannot be added to the merge train";

/// Shared tail of the two add-to-train flavors: once the trigger condition
/// holds, re-arm as a merge-train entry, aborting when the train will not
/// accept the merge request.
pub(crate) fn hand_off_to_train(
    service: &AutoMergeService,
    merge_request: MergeRequestId,
    user: UserId,
) -> ProcessOutcome {
    let train = service.strategy(StrategyKind::MergeTrain);
    match train.execute(service, merge_request, user) {
        ExecuteOutcome::Armed { position, .. } => ProcessOutcome::AddedToTrain {
            position: position.unwrap_or(0),
        },
        ExecuteOutcome::Unavailable => {
            service.abort_auto_merge(merge_request, CANNOT_ADD_REASON, true);
            ProcessOutcome::Aborted {
                reason: CANNOT_ADD_REASON.to_string(),
            }
        }
        // The original intent was rolled back intact; a later trigger
        // retries the hand-off.
        ExecuteOutcome::Failed => ProcessOutcome::Pending,
    }
}

/// Checks shared by every adapter, with the expensive permission lookup
/// memoized per adapter instance.
pub(crate) struct CommonChecks {
    caps: Arc<dyn CapabilitiesProvider>,
    gate: Arc<dyn PermissionGate>,
    can_merge: OnceLock<bool>,
}

impl CommonChecks {
    pub(crate) fn new(caps: Arc<dyn CapabilitiesProvider>, gate: Arc<dyn PermissionGate>) -> Self {
        CommonChecks {
            caps,
            gate,
            can_merge: OnceLock::new(),
        }
    }

    /// True when the checks-pass flavors replace the pipeline-succeeds ones.
    pub(crate) fn checks_pass_flavor(&self) -> bool {
        self.caps.feature_enabled(FEATURE_MERGE_WHEN_CHECKS_PASS)
    }

    /// Merge trains require both the project feature and the license.
    pub(crate) fn trains_enabled(&self) -> bool {
        self.caps.feature_enabled(FEATURE_MERGE_TRAINS) && self.caps.licensed(LICENSE_MERGE_TRAINS)
    }

    /// The memoized permission lookup.
    pub(crate) fn can_merge(&self, user: UserId, merge_request: &MergeRequest) -> bool {
        *self
            .can_merge
            .get_or_init(|| self.gate.can_merge(user, merge_request))
    }

    /// Preconditions every strategy shares: the merge request is open, the
    /// user may merge it, and it is not blocked by other merge requests
    /// (when that licensed check applies).
    pub(crate) fn base(&self, merge_request: &MergeRequest, user: UserId) -> bool {
        if merge_request.merged {
            return false;
        }
        if !self.can_merge(user, merge_request) {
            return false;
        }
        if self.caps.licensed(LICENSE_BLOCKING_MERGE_REQUESTS)
            && merge_request.merge_blocked_by_other_mrs
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::StaticCapabilities;
    use crate::test_utils::CountingGate;
    use crate::types::ProjectId;

    fn mr() -> MergeRequest {
        MergeRequest::new(
            MergeRequestId(1),
            ProjectId(1),
            UserId(10),
            "feature",
            "main",
        )
    }

    #[test]
    fn can_merge_hits_the_gate_at_most_once_per_instance() {
        let gate = Arc::new(CountingGate::allowing(true));
        let checks = CommonChecks::new(
            Arc::new(StaticCapabilities::trains_enabled()),
            gate.clone(),
        );
        let mr = mr();

        assert!(checks.can_merge(UserId(10), &mr));
        assert!(checks.can_merge(UserId(10), &mr));
        assert!(checks.base(&mr, UserId(10)));

        assert_eq!(gate.calls(), 1);
    }

    #[test]
    fn base_rejects_merged_requests_without_consulting_the_gate() {
        let gate = Arc::new(CountingGate::allowing(true));
        let checks = CommonChecks::new(
            Arc::new(StaticCapabilities::trains_enabled()),
            gate.clone(),
        );
        let mut mr = mr();
        mr.merged = true;

        assert!(!checks.base(&mr, UserId(10)));
        assert_eq!(gate.calls(), 0);
    }

    #[test]
    fn blocking_check_applies_only_when_licensed() {
        let mut mr = mr();
        mr.merge_blocked_by_other_mrs = true;

        let licensed = CommonChecks::new(
            Arc::new(StaticCapabilities::trains_enabled()),
            Arc::new(crate::hooks::PermitAll),
        );
        assert!(!licensed.base(&mr, UserId(10)));

        let unlicensed = CommonChecks::new(
            Arc::new(StaticCapabilities::new()),
            Arc::new(crate::hooks::PermitAll),
        );
        assert!(unlicensed.base(&mr, UserId(10)));
    }
}
