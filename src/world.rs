//! The transactional state aggregate.
//!
//! `WorldState` holds everything the orchestration core mutates: merge
//! request snapshots, observed pipelines, trains, and the audit artifacts
//! (system notes, todos). It is `Clone` on purpose: the service realizes
//! transactions by snapshotting the whole aggregate and restoring it when a
//! persistence step fails, so a queue-entry change and its audit emission
//! always commit or roll back together.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::train::Train;
use crate::types::{
    MergeRequest, MergeRequestId, Pipeline, PipelineId, ProjectId, StrategyKind, TrainKey, UserId,
};

/// What a system note records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteAction {
    /// Auto-merge was armed.
    Armed,

    /// Auto-merge was canceled by a user.
    Canceled,

    /// Auto-merge was aborted with a reason.
    Aborted,
}

/// An audit record emitted alongside auto-merge state changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemNote {
    pub merge_request: MergeRequestId,
    pub project: ProjectId,
    pub author: UserId,
    pub action: NoteAction,
    pub strategy: StrategyKind,

    /// Supporting context: the validated SHA for armed notes on
    /// pipeline-gated strategies, the human-readable reason for aborts.
    pub context: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl SystemNote {
    pub fn new(
        merge_request: MergeRequestId,
        project: ProjectId,
        author: UserId,
        action: NoteAction,
        strategy: StrategyKind,
        context: Option<String>,
    ) -> Self {
        SystemNote {
            merge_request,
            project,
            author,
            action,
            strategy,
            context,
            created_at: Utc::now(),
        }
    }

    /// The note's wire name, e.g. `merge_train`, `cancel_merge_train`,
    /// `abort_merge_train`.
    pub fn name(&self) -> String {
        match self.action {
            NoteAction::Armed => self.strategy.as_str().to_string(),
            NoteAction::Canceled => format!("cancel_{}", self.strategy.as_str()),
            NoteAction::Aborted => format!("abort_{}", self.strategy.as_str()),
        }
    }
}

/// The state of a todo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoState {
    Pending,
    Done,
}

/// A todo generated for a merge request author when their auto-merge is
/// aborted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    pub merge_request: MergeRequestId,
    pub user: UserId,
    pub state: TodoState,
    pub created_at: DateTime<Utc>,
}

impl Todo {
    pub fn pending(merge_request: MergeRequestId, user: UserId) -> Self {
        Todo {
            merge_request,
            user,
            state: TodoState::Pending,
            created_at: Utc::now(),
        }
    }
}

/// The full mutable state the service operates on.
#[derive(Debug, Clone, Default)]
pub struct WorldState {
    pub merge_requests: HashMap<MergeRequestId, MergeRequest>,
    pub pipelines: HashMap<PipelineId, Pipeline>,
    pub trains: HashMap<TrainKey, Train>,
    pub notes: Vec<SystemNote>,
    pub todos: Vec<Todo>,
}

impl WorldState {
    pub fn new() -> Self {
        WorldState::default()
    }

    pub fn merge_request(&self, id: MergeRequestId) -> Option<&MergeRequest> {
        self.merge_requests.get(&id)
    }

    pub fn merge_request_mut(&mut self, id: MergeRequestId) -> Option<&mut MergeRequest> {
        self.merge_requests.get_mut(&id)
    }

    pub fn pipeline(&self, id: PipelineId) -> Option<&Pipeline> {
        self.pipelines.get(&id)
    }

    pub fn pipeline_mut(&mut self, id: PipelineId) -> Option<&mut Pipeline> {
        self.pipelines.get_mut(&id)
    }

    /// The pipeline validating a merge request's current diff head.
    pub fn diff_head_pipeline(&self, mr: &MergeRequest) -> Option<&Pipeline> {
        mr.diff_head_pipeline.and_then(|id| self.pipelines.get(&id))
    }

    pub fn train(&self, key: &TrainKey) -> Option<&Train> {
        self.trains.get(key)
    }

    pub fn train_mut(&mut self, key: &TrainKey) -> Option<&mut Train> {
        self.trains.get_mut(key)
    }

    /// The train for a key, creating an empty one if absent.
    pub fn train_entry(&mut self, key: &TrainKey) -> &mut Train {
        self.trains
            .entry(key.clone())
            .or_insert_with(|| Train::new(key.clone()))
    }

    /// The active car for a merge request on its target branch's train.
    pub fn car_for(&self, mr: &MergeRequest) -> Option<&crate::types::Car> {
        self.train(&mr.train_key())?.find(mr.id)
    }

    /// Notes recorded for a merge request, in emission order.
    pub fn notes_for(&self, id: MergeRequestId) -> impl Iterator<Item = &SystemNote> {
        self.notes.iter().filter(move |n| n.merge_request == id)
    }

    /// Pending todos for a user.
    pub fn pending_todos_for(&self, user: UserId) -> impl Iterator<Item = &Todo> {
        self.todos
            .iter()
            .filter(move |t| t.user == user && t.state == TodoState::Pending)
    }

    /// Inserts or replaces a merge request snapshot.
    pub fn upsert_merge_request(&mut self, mr: MergeRequest) {
        self.merge_requests.insert(mr.id, mr);
    }

    /// Inserts or replaces an observed pipeline.
    pub fn upsert_pipeline(&mut self, pipeline: Pipeline) {
        self.pipelines.insert(pipeline.id, pipeline);
    }
}
