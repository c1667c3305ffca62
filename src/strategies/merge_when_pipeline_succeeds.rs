//! Merge directly once the head pipeline succeeds. The legacy non-train
//! strategy, available only while the checks-pass flag is off.

use std::sync::Arc;

use crate::hooks::{CapabilitiesProvider, PermissionGate};
use crate::service::AutoMergeService;
use crate::types::{MergeRequest, MergeRequestId, StrategyKind, UserId};
use crate::world::WorldState;

use super::{AutoMergeStrategy, CommonChecks, ExecuteOutcome, ProcessOutcome};

pub struct MergeWhenPipelineSucceeds {
    checks: CommonChecks,
}

impl MergeWhenPipelineSucceeds {
    pub fn new(caps: Arc<dyn CapabilitiesProvider>, gate: Arc<dyn PermissionGate>) -> Self {
        MergeWhenPipelineSucceeds {
            checks: CommonChecks::new(caps, gate),
        }
    }
}

impl AutoMergeStrategy for MergeWhenPipelineSucceeds {
    fn kind(&self) -> StrategyKind {
        StrategyKind::MergeWhenPipelineSucceeds
    }

    fn available_for(
        &self,
        world: &WorldState,
        merge_request: &MergeRequest,
        user: UserId,
    ) -> bool {
        if self.checks.checks_pass_flavor() {
            return false;
        }
        if !self.checks.base(merge_request, user) {
            return false;
        }
        if merge_request.draft || !merge_request.has_ci_enabled {
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
        service.merge_when_ready(merge_request, true)
    }
}
