//! Merge directly once every mergeability check passes. The modern
//! replacement for merge-when-pipeline-succeeds, flag-gated, and deliberately
//! more permissive at arming time: drafts and not-yet-mergeable requests may
//! arm it, since the checks themselves are the trigger.

use std::sync::Arc;

use crate::hooks::{CapabilitiesProvider, PermissionGate};
use crate::service::AutoMergeService;
use crate::types::{MergeRequest, MergeRequestId, StrategyKind, UserId};
use crate::world::WorldState;

use super::{AutoMergeStrategy, CommonChecks, ExecuteOutcome, ProcessOutcome};

pub struct MergeWhenChecksPass {
    checks: CommonChecks,
}

impl MergeWhenChecksPass {
    pub fn new(caps: Arc<dyn CapabilitiesProvider>, gate: Arc<dyn PermissionGate>) -> Self {
        MergeWhenChecksPass {
            checks: CommonChecks::new(caps, gate),
        }
    }
}

impl AutoMergeStrategy for MergeWhenChecksPass {
    fn kind(&self) -> StrategyKind {
        StrategyKind::MergeWhenChecksPass
    }

    fn available_for(
        &self,
        _world: &WorldState,
        merge_request: &MergeRequest,
        user: UserId,
    ) -> bool {
        self.checks.checks_pass_flavor() && self.checks.base(merge_request, user)
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
        service.merge_when_ready(merge_request, false)
    }
}
