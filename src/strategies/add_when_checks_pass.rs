//! Enter the merge train once every mergeability check passes. The
//! flag-gated modern flavor: like merge-when-checks-pass it may be armed on
//! drafts, since the checks themselves (including draft state) gate the
//! hand-off to the train.

use std::sync::Arc;

use crate::hooks::{CapabilitiesProvider, PermissionGate};
use crate::service::AutoMergeService;
use crate::types::{MergeRequest, MergeRequestId, StrategyKind, UserId};
use crate::world::WorldState;

use super::{hand_off_to_train, AutoMergeStrategy, CommonChecks, ExecuteOutcome, ProcessOutcome};

pub struct AddToTrainWhenChecksPass {
    checks: CommonChecks,
}

impl AddToTrainWhenChecksPass {
    pub fn new(caps: Arc<dyn CapabilitiesProvider>, gate: Arc<dyn PermissionGate>) -> Self {
        AddToTrainWhenChecksPass {
            checks: CommonChecks::new(caps, gate),
        }
    }
}

impl AutoMergeStrategy for AddToTrainWhenChecksPass {
    fn kind(&self) -> StrategyKind {
        StrategyKind::AddToTrainWhenChecksPass
    }

    fn available_for(
        &self,
        _world: &WorldState,
        merge_request: &MergeRequest,
        user: UserId,
    ) -> bool {
        self.checks.checks_pass_flavor()
            && self.checks.trains_enabled()
            && self.checks.base(merge_request, user)
            && !merge_request.for_fork
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
            Some((intent.armed_by, mr.mergeability_checks_pass()))
        });

        match trigger {
            None => ProcessOutcome::NotArmed,
            Some((_, false)) => ProcessOutcome::Pending,
            Some((armed_by, true)) => hand_off_to_train(service, merge_request, armed_by),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{PermitAll, StaticCapabilities, FEATURE_MERGE_WHEN_CHECKS_PASS};
    use crate::types::ProjectId;

    fn strategy(caps: StaticCapabilities) -> AddToTrainWhenChecksPass {
        AddToTrainWhenChecksPass::new(Arc::new(caps), Arc::new(PermitAll))
    }

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
    fn needs_both_trains_and_the_flag() {
        let world = WorldState::new();
        let mr = mr();

        let both = strategy(
            StaticCapabilities::trains_enabled().with_feature(FEATURE_MERGE_WHEN_CHECKS_PASS),
        );
        assert!(both.available_for(&world, &mr, UserId(10)));

        let trains_only = strategy(StaticCapabilities::trains_enabled());
        assert!(!trains_only.available_for(&world, &mr, UserId(10)));

        let flag_only =
            strategy(StaticCapabilities::new().with_feature(FEATURE_MERGE_WHEN_CHECKS_PASS));
        assert!(!flag_only.available_for(&world, &mr, UserId(10)));
    }

    #[test]
    fn drafts_may_arm_it_but_forks_may_not() {
        let world = WorldState::new();
        let s = strategy(
            StaticCapabilities::trains_enabled().with_feature(FEATURE_MERGE_WHEN_CHECKS_PASS),
        );

        let mut draft = mr();
        draft.draft = true;
        assert!(s.available_for(&world, &draft, UserId(10)));

        let mut fork = mr();
        fork.for_fork = true;
        assert!(!s.available_for(&world, &fork, UserId(10)));
    }
}
