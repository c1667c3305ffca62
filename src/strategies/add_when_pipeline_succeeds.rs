//! Enter the merge train once the head pipeline succeeds. The arming-time
//! counterpart of the merge-train strategy for merge requests whose pipeline
//! is still running; available only while the checks-pass flag is off.

use std::sync::Arc;

use crate::hooks::{CapabilitiesProvider, PermissionGate};
use crate::service::AutoMergeService;
use crate::types::{MergeRequest, MergeRequestId, StrategyKind, UserId};
use crate::world::WorldState;

use super::{hand_off_to_train, AutoMergeStrategy, CommonChecks, ExecuteOutcome, ProcessOutcome};

pub struct AddToTrainWhenPipelineSucceeds {
    checks: CommonChecks,
}

impl AddToTrainWhenPipelineSucceeds {
    pub fn new(caps: Arc<dyn CapabilitiesProvider>, gate: Arc<dyn PermissionGate>) -> Self {
        AddToTrainWhenPipelineSucceeds {
            checks: CommonChecks::new(caps, gate),
        }
    }
}

impl AutoMergeStrategy for AddToTrainWhenPipelineSucceeds {
    fn kind(&self) -> StrategyKind {
        StrategyKind::AddToTrainWhenPipelineSucceeds
    }

    fn available_for(
        &self,
        world: &WorldState,
        merge_request: &MergeRequest,
        user: UserId,
    ) -> bool {
        if self.checks.checks_pass_flavor() || !self.checks.trains_enabled() {
            return false;
        }
        if !self.checks.base(merge_request, user) {
            return false;
        }
        if merge_request.draft || merge_request.for_fork {
            return false;
        }
        world
            .diff_head_pipeline(merge_request)
            .is_some_and(|pipeline| pipeline.status.is_active())
    }

    fn execute(
        &self,
        service: &AutoMergeService,
        merge_request: MergeRequestId,
        user: UserId,
    ) -> ExecuteOutcome {
        service.arm(self, merge_request, user)
    }

    fn process(&self, service: &AutoMergeService, merge_request: MergeRequestId) -> ProcessOutcome {
        let trigger = service.read(|world| {
            let mr = world.merge_request(merge_request)?;
            let intent = mr.auto_merge.as_ref()?;
            let succeeded = world
                .diff_head_pipeline(mr)
                .is_some_and(|p| p.status.succeeded());
            // A mergeability check still in flight is not a reason to give
            // up: the train's own processing re-checks it.
            let checks_ok =
                mr.mergeability_checks_pass() || mr.merge_status.in_progress_or_unchecked();
            Some((intent.armed_by, succeeded && checks_ok))
        });

        match trigger {
            None => ProcessOutcome::NotArmed,
            Some((_, false)) => ProcessOutcome::Pending,
            Some((armed_by, true)) => hand_off_to_train(service, merge_request, armed_by),
        }
    }
}
