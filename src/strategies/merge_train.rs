//! The merge-train strategy: the merge request rides a car on its target
//! branch's train and merges when it reaches the head with a successful
//! validation pipeline.

use std::sync::Arc;

use crate::hooks::{CapabilitiesProvider, PermissionGate};
use crate::service::{AutoMergeService, TrainStep};
use crate::types::{MergeRequest, MergeRequestId, StrategyKind, UserId};
use crate::world::WorldState;

use super::{AutoMergeStrategy, CommonChecks, ExecuteOutcome, ProcessOutcome};

/// Reason used when the head car's validation pipeline fails.
pub(crate) const PIPELINE_FAILED_REASON: &str =
    "the merge train validation pipeline did not succeed";

pub struct MergeTrainStrategy {
    checks: CommonChecks,
}

impl MergeTrainStrategy {
    pub fn new(caps: Arc<dyn CapabilitiesProvider>, gate: Arc<dyn PermissionGate>) -> Self {
        MergeTrainStrategy {
            checks: CommonChecks::new(caps, gate),
        }
    }
}

impl AutoMergeStrategy for MergeTrainStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::MergeTrain
    }

    fn available_for(
        &self,
        world: &WorldState,
        merge_request: &MergeRequest,
        user: UserId,
    ) -> bool {
        if !self.checks.trains_enabled() {
            return false;
        }
        if !self.checks.base(merge_request, user) {
            return false;
        }
        if merge_request.draft || merge_request.for_fork {
            return false;
        }
        // The head pipeline must have settled: a still-running pipeline means
        // the add-to-train flavor applies instead.
        match world.diff_head_pipeline(merge_request) {
            Some(pipeline) => pipeline.status.settled_for_train(),
            None => !merge_request.has_ci_enabled,
        }
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
        match service.process_train_car(merge_request) {
            TrainStep::Merged => ProcessOutcome::Merged,
            TrainStep::PipelineFailed => {
                self.abort(service, merge_request, PIPELINE_FAILED_REASON, true);
                ProcessOutcome::Aborted {
                    reason: PIPELINE_FAILED_REASON.to_string(),
                }
            }
            TrainStep::Pending => ProcessOutcome::Pending,
            TrainStep::NotQueued => ProcessOutcome::NotArmed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{PermitAll, StaticCapabilities};
    use crate::types::{Pipeline, PipelineId, PipelineStatus, ProjectId, Sha};

    fn strategy(caps: StaticCapabilities) -> MergeTrainStrategy {
        MergeTrainStrategy::new(Arc::new(caps), Arc::new(PermitAll))
    }

    fn world_and_mr(pipeline_status: Option<PipelineStatus>) -> (WorldState, MergeRequest) {
        let mut world = WorldState::new();
        let mut mr = MergeRequest::new(
            MergeRequestId(1),
            ProjectId(1),
            UserId(10),
            "feature",
            "main",
        );
        if let Some(status) = pipeline_status {
            let id = PipelineId(100);
            world.upsert_pipeline(Pipeline::new(id, Sha::new("a".repeat(40)), status));
            mr.diff_head_pipeline = Some(id);
        }
        world.upsert_merge_request(mr.clone());
        (world, mr)
    }

    #[test]
    fn available_when_head_pipeline_settled() {
        let s = strategy(StaticCapabilities::trains_enabled());
        for status in [
            PipelineStatus::Succeeded,
            PipelineStatus::Failed,
            PipelineStatus::Blocked,
            PipelineStatus::Canceling,
        ] {
            let (world, mr) = world_and_mr(Some(status));
            assert!(s.available_for(&world, &mr, UserId(10)), "{status:?}");
        }
    }

    #[test]
    fn unavailable_while_head_pipeline_active() {
        let s = strategy(StaticCapabilities::trains_enabled());
        let (world, mr) = world_and_mr(Some(PipelineStatus::Running));
        assert!(!s.available_for(&world, &mr, UserId(10)));
    }

    #[test]
    fn unavailable_without_feature_or_license() {
        let (world, mr) = world_and_mr(Some(PipelineStatus::Succeeded));

        let feature_only =
            strategy(StaticCapabilities::new().with_feature(crate::hooks::FEATURE_MERGE_TRAINS));
        assert!(!feature_only.available_for(&world, &mr, UserId(10)));

        let license_only =
            strategy(StaticCapabilities::new().with_license(crate::hooks::LICENSE_MERGE_TRAINS));
        assert!(!license_only.available_for(&world, &mr, UserId(10)));
    }

    #[test]
    fn unavailable_for_drafts_and_forks() {
        let s = strategy(StaticCapabilities::trains_enabled());
        let (world, mut mr) = world_and_mr(Some(PipelineStatus::Succeeded));

        mr.draft = true;
        assert!(!s.available_for(&world, &mr, UserId(10)));
        mr.draft = false;
        mr.for_fork = true;
        assert!(!s.available_for(&world, &mr, UserId(10)));
    }

    #[test]
    fn no_pipeline_is_fine_only_without_ci() {
        let s = strategy(StaticCapabilities::trains_enabled());
        let (world, mut mr) = world_and_mr(None);
        assert!(!s.available_for(&world, &mr, UserId(10)));

        mr.has_ci_enabled = false;
        assert!(s.available_for(&world, &mr, UserId(10)));
    }
}
