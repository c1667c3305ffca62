//! The auto-merge orchestration service.
//!
//! `AutoMergeService` owns the world state behind a lock and realizes every
//! operation as a transaction: the state is snapshotted before the mutation
//! closure runs, and restored wholesale when a persistence step fails. A
//! queue-entry change and its audit emission therefore commit or roll back
//! together.
//!
//! The service is also the dispatcher: `execute`/`process`/`cancel`/`abort`
//! route through the strategy adapters in [`crate::strategies`], and train
//! movement is driven by refresh signals on the [`crate::refresh`] bus.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;

use crate::error::PersistenceError;
use crate::hooks::{
    AlwaysOkAudit, AuditSink, CapabilitiesProvider, ErrorTracker, Notifier, NoopNotifier,
    PermissionGate, PermitAll, SequentialPipelineFactory, StaticCapabilities, TracingTracker,
    TrainPipelineFactory,
};
use crate::refresh::RefreshBus;
use crate::strategies::{
    AbortOutcome, AddToTrainWhenChecksPass, AddToTrainWhenPipelineSucceeds, AutoMergeStrategy,
    CancelOutcome, ExecuteOutcome, MergeTrainStrategy, MergeWhenChecksPass,
    MergeWhenPipelineSucceeds, ProcessOutcome,
};
use crate::types::{
    AutoMergeIntent, CarStatus, MergeRequestId, PipelineId, PipelineStatus, ProjectId,
    StrategyKind, TrainKey, UserId,
};
use crate::world::{NoteAction, SystemNote, Todo, WorldState};

/// Message returned when a cancel fails on a persistence error.
pub const CANT_CANCEL: &str = "Can't cancel the automatic merge";

/// Message returned when an abort fails on a persistence error.
pub const CANT_ABORT: &str = "Can't abort the automatic merge";

/// What `process` found for a merge-train car.
pub(crate) enum TrainStep {
    Merged,
    PipelineFailed,
    Pending,
    NotQueued,
}

enum ArmStep {
    Armed {
        position: Option<usize>,
        key: TrainKey,
    },
    AlreadyArmed {
        position: Option<usize>,
    },
    Unavailable,
}

pub struct AutoMergeService {
    state: Mutex<WorldState>,
    caps: Arc<dyn CapabilitiesProvider>,
    gate: Arc<dyn PermissionGate>,
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn Notifier>,
    tracker: Arc<dyn ErrorTracker>,
    pipelines: Arc<dyn TrainPipelineFactory>,
    refresh: RefreshBus,
}

/// Builder with production defaults for every collaborator.
pub struct AutoMergeServiceBuilder {
    caps: Arc<dyn CapabilitiesProvider>,
    gate: Arc<dyn PermissionGate>,
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn Notifier>,
    tracker: Arc<dyn ErrorTracker>,
    pipelines: Arc<dyn TrainPipelineFactory>,
}

impl AutoMergeServiceBuilder {
    fn new() -> Self {
        AutoMergeServiceBuilder {
            caps: Arc::new(StaticCapabilities::trains_enabled()),
            gate: Arc::new(PermitAll),
            audit: Arc::new(AlwaysOkAudit),
            notifier: Arc::new(NoopNotifier),
            tracker: Arc::new(TracingTracker),
            pipelines: Arc::new(SequentialPipelineFactory::new(true)),
        }
    }

    pub fn capabilities(mut self, caps: Arc<dyn CapabilitiesProvider>) -> Self {
        self.caps = caps;
        self
    }

    pub fn permission_gate(mut self, gate: Arc<dyn PermissionGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn error_tracker(mut self, tracker: Arc<dyn ErrorTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn pipeline_factory(mut self, pipelines: Arc<dyn TrainPipelineFactory>) -> Self {
        self.pipelines = pipelines;
        self
    }

    pub fn build(self, refresh: RefreshBus) -> AutoMergeService {
        AutoMergeService {
            state: Mutex::new(WorldState::new()),
            caps: self.caps,
            gate: self.gate,
            audit: self.audit,
            notifier: self.notifier,
            tracker: self.tracker,
            pipelines: self.pipelines,
            refresh,
        }
    }
}

impl AutoMergeService {
    pub fn builder() -> AutoMergeServiceBuilder {
        AutoMergeServiceBuilder::new()
    }

    /// Runs a closure against the current world state.
    pub fn read<R>(&self, f: impl FnOnce(&WorldState) -> R) -> R {
        let world = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&world)
    }

    /// Runs an infallible mutation. Boundary updates (merge request and
    /// pipeline snapshots) enter the world through this.
    pub fn update<R>(&self, f: impl FnOnce(&mut WorldState) -> R) -> R {
        let mut world = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut world)
    }

    /// Runs a fallible mutation transactionally: on error the whole world is
    /// restored to its pre-closure snapshot.
    fn transaction<R>(
        &self,
        f: impl FnOnce(&mut WorldState) -> Result<R, PersistenceError>,
    ) -> Result<R, PersistenceError> {
        let mut world = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = world.clone();
        match f(&mut world) {
            Ok(value) => Ok(value),
            Err(error) => {
                *world = snapshot;
                Err(error)
            }
        }
    }

    /// Builds a fresh adapter for a strategy. Fresh on purpose: the
    /// permission memo lives on the instance.
    pub fn strategy(&self, kind: StrategyKind) -> Box<dyn AutoMergeStrategy> {
        let caps = self.caps.clone();
        let gate = self.gate.clone();
        match kind {
            StrategyKind::MergeTrain => Box::new(MergeTrainStrategy::new(caps, gate)),
            StrategyKind::MergeWhenPipelineSucceeds => {
                Box::new(MergeWhenPipelineSucceeds::new(caps, gate))
            }
            StrategyKind::MergeWhenChecksPass => Box::new(MergeWhenChecksPass::new(caps, gate)),
            StrategyKind::AddToTrainWhenPipelineSucceeds => {
                Box::new(AddToTrainWhenPipelineSucceeds::new(caps, gate))
            }
            StrategyKind::AddToTrainWhenChecksPass => {
                Box::new(AddToTrainWhenChecksPass::new(caps, gate))
            }
        }
    }

    /// The strategies currently available for a merge request, in preference
    /// order. The first entry is the one a UI would offer by default.
    pub fn available_strategies(&self, merge_request: MergeRequestId, user: UserId) -> Vec<StrategyKind> {
        self.read(|world| {
            let Some(mr) = world.merge_request(merge_request) else {
                return Vec::new();
            };
            StrategyKind::ALL
                .iter()
                .copied()
                .filter(|kind| self.strategy(*kind).available_for(world, mr, user))
                .collect()
        })
    }

    pub fn preferred_strategy(&self, merge_request: MergeRequestId, user: UserId) -> Option<StrategyKind> {
        self.available_strategies(merge_request, user).first().copied()
    }

    // ─── Dispatch ───

    pub fn execute(
        &self,
        kind: StrategyKind,
        merge_request: MergeRequestId,
        user: UserId,
    ) -> ExecuteOutcome {
        self.strategy(kind).execute(self, merge_request, user)
    }

    /// Routes a trigger to the armed strategy.
    pub fn process(&self, merge_request: MergeRequestId) -> ProcessOutcome {
        let armed = self.read(|world| {
            world
                .merge_request(merge_request)
                .and_then(|mr| mr.auto_merge.as_ref())
                .map(|intent| intent.strategy)
        });
        match armed {
            Some(kind) => self.strategy(kind).process(self, merge_request),
            None => ProcessOutcome::NotArmed,
        }
    }

    pub fn cancel(&self, merge_request: MergeRequestId) -> CancelOutcome {
        self.cancel_auto_merge(merge_request)
    }

    pub fn abort(
        &self,
        merge_request: MergeRequestId,
        reason: &str,
        process_next: bool,
    ) -> AbortOutcome {
        self.abort_auto_merge(merge_request, reason, process_next)
    }

    // ─── Strategy support ───

    /// Transactionally arms a strategy: availability re-checked under the
    /// lock, intent recorded, a car enqueued for the merge-train strategy,
    /// and an armed note persisted. Rolls back entirely on audit failure.
    pub(crate) fn arm(
        &self,
        strategy: &dyn AutoMergeStrategy,
        merge_request: MergeRequestId,
        user: UserId,
    ) -> ExecuteOutcome {
        let kind = strategy.kind();
        let result = self.transaction(|world| {
            let Some(mr) = world.merge_request(merge_request).cloned() else {
                return Ok(ArmStep::Unavailable);
            };

            // Re-running execute for the strategy already armed is a no-op:
            // the car, intent, and audit trail stay exactly as they were.
            if mr.auto_merge.as_ref().is_some_and(|i| i.strategy == kind) {
                let position = world
                    .train(&mr.train_key())
                    .and_then(|t| t.position_of(merge_request));
                return Ok(ArmStep::AlreadyArmed { position });
            }

            if !strategy.available_for(world, &mr, user) {
                return Ok(ArmStep::Unavailable);
            }

            let key = mr.train_key();
            let sha = world.diff_head_pipeline(&mr).map(|p| p.sha.clone());

            let position = if kind == StrategyKind::MergeTrain {
                let (position, _created) = world.train_entry(&key).enqueue(merge_request, user, Utc::now());
                Some(position)
            } else {
                None
            };

            // The checks-pass flavors are not pipeline-bound, so no SHA is
            // recorded for them.
            let sha_at_arming = if kind.pipeline_gated() || kind == StrategyKind::MergeTrain {
                sha
            } else {
                None
            };
            if let Some(mr) = world.merge_request_mut(merge_request) {
                mr.auto_merge = Some(AutoMergeIntent::new(kind, user, sha_at_arming.clone()));
            }

            let note = SystemNote::new(
                merge_request,
                mr.project,
                user,
                NoteAction::Armed,
                kind,
                sha_at_arming.map(|s| s.to_string()),
            );
            self.audit.persist_note(&note)?;
            world.notes.push(note);

            Ok(ArmStep::Armed { position, key })
        });

        match result {
            Ok(ArmStep::Armed { position, key }) => {
                tracing::info!(merge_request = %merge_request, strategy = %kind, "auto-merge armed");
                if kind == StrategyKind::MergeTrain {
                    self.request_refresh(&key);
                }
                ExecuteOutcome::Armed {
                    strategy: kind,
                    position,
                }
            }
            Ok(ArmStep::AlreadyArmed { position }) => {
                tracing::debug!(merge_request = %merge_request, strategy = %kind, "already armed");
                ExecuteOutcome::Armed {
                    strategy: kind,
                    position,
                }
            }
            Ok(ArmStep::Unavailable) => ExecuteOutcome::Unavailable,
            Err(error) => {
                self.tracker.capture(merge_request, &error);
                ExecuteOutcome::Failed
            }
        }
    }

    /// Merges a non-train merge request if its trigger condition holds.
    pub(crate) fn merge_when_ready(
        &self,
        merge_request: MergeRequestId,
        need_pipeline_success: bool,
    ) -> ProcessOutcome {
        let outcome = self.update(|world| {
            let Some(mr) = world.merge_request(merge_request).cloned() else {
                return ProcessOutcome::NotArmed;
            };
            if mr.auto_merge.is_none() {
                return ProcessOutcome::NotArmed;
            }
            if need_pipeline_success
                && !world
                    .diff_head_pipeline(&mr)
                    .is_some_and(|p| p.status.succeeded())
            {
                return ProcessOutcome::Pending;
            }
            if !mr.mergeability_checks_pass() {
                return ProcessOutcome::Pending;
            }
            if let Some(mr) = world.merge_request_mut(merge_request) {
                mr.merged = true;
                mr.auto_merge = None;
            }
            ProcessOutcome::Merged
        });
        if outcome == ProcessOutcome::Merged {
            tracing::info!(merge_request = %merge_request, "auto-merged");
        }
        outcome
    }

    /// Evaluates a merge-train car: merge it when it is the fresh head with
    /// a validation pipeline that passes (success, or blocked/canceling),
    /// flag a failed validation pipeline, otherwise leave it waiting.
    pub(crate) fn process_train_car(&self, merge_request: MergeRequestId) -> TrainStep {
        let (step, key) = self.update(|world| {
            let Some(mr) = world.merge_request(merge_request).cloned() else {
                return (TrainStep::NotQueued, None);
            };
            let key = mr.train_key();
            let Some(train) = world.train(&key) else {
                return (TrainStep::NotQueued, None);
            };
            let Some(position) = train.position_of(merge_request) else {
                return (TrainStep::NotQueued, None);
            };
            let Some(car) = train.find(merge_request).cloned() else {
                return (TrainStep::NotQueued, None);
            };
            let pipeline_status = car
                .pipeline()
                .and_then(|id| world.pipeline(id))
                .map(|p| p.status);

            if matches!(
                pipeline_status,
                Some(PipelineStatus::Failed | PipelineStatus::Canceled)
            ) {
                return (TrainStep::PipelineFailed, None);
            }

            let ready = position == 0
                && car.status == CarStatus::Fresh
                && pipeline_status.is_some_and(|s| s.passes_for_merge())
                && mr.mergeability_checks_pass();
            if !ready {
                return (TrainStep::Pending, None);
            }

            if let Some(train) = world.train_mut(&key) {
                train.complete_head_merge();
            }
            if let Some(mr) = world.merge_request_mut(merge_request) {
                mr.merged = true;
                mr.auto_merge = None;
            }
            (TrainStep::Merged, Some(key))
        });

        if let Some(key) = key {
            tracing::info!(merge_request = %merge_request, train = %key, "head car merged");
            self.request_refresh(&key);
        }
        step
    }

    /// Clears the armed intent and any car, and records a cancel note. User
    /// intent, so no todo and no reason.
    pub(crate) fn cancel_auto_merge(&self, merge_request: MergeRequestId) -> CancelOutcome {
        let result = self.transaction(|world| {
            let Some(mr) = world.merge_request(merge_request).cloned() else {
                return Ok(None);
            };
            let Some(intent) = mr.auto_merge.clone() else {
                return Ok(None);
            };

            let key = mr.train_key();
            if let Some(train) = world.train_mut(&key) {
                train.remove(merge_request);
            }
            if let Some(mr) = world.merge_request_mut(merge_request) {
                mr.auto_merge = None;
            }

            let note = SystemNote::new(
                merge_request,
                mr.project,
                intent.armed_by,
                NoteAction::Canceled,
                intent.strategy,
                None,
            );
            self.audit.persist_note(&note)?;
            world.notes.push(note);
            Ok(Some(key))
        });

        match result {
            Ok(Some(key)) => {
                tracing::info!(merge_request = %merge_request, "auto-merge canceled");
                self.request_refresh(&key);
                CancelOutcome::Canceled
            }
            Ok(None) => CancelOutcome::NotArmed,
            Err(error) => {
                self.tracker.capture(merge_request, &error);
                CancelOutcome::Error {
                    message: CANT_CANCEL.to_string(),
                }
            }
        }
    }

    /// System-initiated disarm: like cancel, plus job cancellation on the
    /// car's validation pipeline, an abort note carrying the reason, a todo
    /// for the author, and a merge-status notification.
    pub(crate) fn abort_auto_merge(
        &self,
        merge_request: MergeRequestId,
        reason: &str,
        process_next: bool,
    ) -> AbortOutcome {
        let result = self.transaction(|world| {
            let Some(mr) = world.merge_request(merge_request).cloned() else {
                return Ok(None);
            };
            let Some(intent) = mr.auto_merge.clone() else {
                return Ok(None);
            };

            let key = mr.train_key();
            let removed = world
                .train_mut(&key)
                .and_then(|train| train.remove(merge_request));
            if let Some(pipeline_id) = removed.as_ref().and_then(|car| car.pipeline()) {
                if let Some(pipeline) = world.pipeline_mut(pipeline_id) {
                    pipeline.cancel_jobs();
                }
            }
            if let Some(mr) = world.merge_request_mut(merge_request) {
                mr.auto_merge = None;
            }

            let note = SystemNote::new(
                merge_request,
                mr.project,
                intent.armed_by,
                NoteAction::Aborted,
                intent.strategy,
                Some(reason.to_string()),
            );
            self.audit.persist_note(&note)?;
            world.notes.push(note);
            world.todos.push(Todo::pending(merge_request, mr.author));
            Ok(Some(key))
        });

        match result {
            Ok(Some(key)) => {
                tracing::warn!(merge_request = %merge_request, reason, "auto-merge aborted");
                self.notifier.merge_status_updated(merge_request);
                if process_next {
                    self.request_refresh(&key);
                }
                AbortOutcome::Aborted
            }
            Ok(None) => AbortOutcome::NotArmed,
            Err(error) => {
                self.tracker.capture(merge_request, &error);
                AbortOutcome::Error {
                    message: CANT_ABORT.to_string(),
                }
            }
        }
    }

    // ─── Refresh ───

    /// Schedules an asynchronous refresh for a train. A train with no active
    /// cars has nothing to refresh; duplicate signals for a train already
    /// pending are suppressed by the bus.
    pub fn request_refresh(&self, key: &TrainKey) {
        let has_cars = self.read(|world| world.train(key).is_some_and(|t| !t.is_empty()));
        if !has_cars {
            return;
        }
        if self.refresh.request(key.clone()) {
            tracing::debug!(train = %key, "refresh scheduled");
        }
    }

    /// Refreshes a train: cascade staleness from queue changes, revalidate
    /// stale cars head-first via the pipeline factory, merge the head while
    /// its pipeline passes, and repeat until the train settles.
    ///
    /// At-least-once and idempotent: refreshing an unchanged train is a
    /// no-op.
    pub fn refresh_train(&self, key: &TrainKey) {
        loop {
            let merged = self.update(|world| {
                if world.train(key).is_none() {
                    return false;
                }

                let went_stale = world
                    .train_mut(key)
                    .map(|t| t.mark_outdated_stale())
                    .unwrap_or_default();
                if !went_stale.is_empty() {
                    tracing::debug!(train = %key, count = went_stale.len(), "cars went stale");
                }

                let needing = world
                    .train(key)
                    .map(|t| t.needing_validation())
                    .unwrap_or_default();
                for (mr_id, predecessor_seq) in needing {
                    let Some(mr) = world.merge_request(mr_id).cloned() else {
                        continue;
                    };
                    let predecessor = world.train(key).and_then(|train| {
                        let position = train.position_of(mr_id)?;
                        position.checked_sub(1).map(|i| train.cars()[i].clone())
                    });
                    match self.pipelines.create(&mr, key, predecessor.as_ref()) {
                        Ok(Some(pipeline)) => {
                            let pipeline_id = pipeline.id;
                            let train_ref = pipeline.sha.clone();
                            world.upsert_pipeline(pipeline);
                            if let Some(car) =
                                world.train_mut(key).and_then(|t| t.find_mut(mr_id))
                            {
                                car.attach_validation(pipeline_id, train_ref, predecessor_seq);
                            }
                        }
                        Ok(None) => {
                            tracing::debug!(
                                train = %key,
                                merge_request = %mr_id,
                                "pipeline factory declined; car stays stale"
                            );
                        }
                        Err(error) => self.tracker.capture(mr_id, &error),
                    }
                }

                let Some(head) = world.train(key).and_then(|t| t.head().cloned()) else {
                    return false;
                };
                let checks_pass = world
                    .merge_request(head.merge_request)
                    .is_some_and(|mr| mr.mergeability_checks_pass());
                let pipeline_ok = head
                    .pipeline()
                    .and_then(|id| world.pipeline(id))
                    .is_some_and(|p| p.status.passes_for_merge());
                if head.status != CarStatus::Fresh || !pipeline_ok || !checks_pass {
                    return false;
                }

                if let Some(train) = world.train_mut(key) {
                    train.complete_head_merge();
                }
                if let Some(mr) = world.merge_request_mut(head.merge_request) {
                    mr.merged = true;
                    mr.auto_merge = None;
                }
                tracing::info!(train = %key, merge_request = %head.merge_request, "head car merged");
                true
            });
            if !merged {
                break;
            }
        }
    }

    // ─── Boundary events ───

    /// Reacts to a pipeline reaching a new status: every armed merge request
    /// watching that pipeline (as diff head or as car validation) gets
    /// processed.
    pub fn pipeline_status_changed(
        &self,
        pipeline: PipelineId,
    ) -> Vec<(MergeRequestId, ProcessOutcome)> {
        let mut targets: Vec<MergeRequestId> = self.read(|world| {
            world
                .merge_requests
                .values()
                .filter(|mr| mr.auto_merge.is_some())
                .filter(|mr| {
                    mr.diff_head_pipeline == Some(pipeline)
                        || world.car_for(mr).and_then(|car| car.pipeline()) == Some(pipeline)
                })
                .map(|mr| mr.id)
                .collect()
        });
        targets.sort_unstable_by_key(|id| id.0);
        targets
            .into_iter()
            .map(|id| (id, self.process(id)))
            .collect()
    }

    /// Aborts every queued car in a project's trains, without cascading into
    /// further processing. Used by teardown paths (trains disabled, project
    /// removed). Returns how many cars were aborted.
    pub fn remove_all_for_project(&self, project: ProjectId, reason: &str) -> usize {
        let mut ids: Vec<MergeRequestId> = self.read(|world| {
            world
                .trains
                .values()
                .filter(|train| train.key().project == project)
                .flat_map(|train| train.cars().iter().map(|car| car.merge_request))
                .collect()
        });
        ids.sort_unstable_by_key(|id| id.0);

        let mut aborted = 0;
        for id in ids {
            if matches!(
                self.abort_auto_merge(id, reason, false),
                AbortOutcome::Aborted
            ) {
                aborted += 1;
            }
        }
        aborted
    }
}
