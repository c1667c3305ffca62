//! Car record and status state machine.
//!
//! A car is one merge request's slot in a merge train. Its status tracks
//! whether the car's validation pipeline still reflects the current
//! predecessor state. Removal is modeled as absence from the train rather
//! than as a persisted terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{MergeRequestId, PipelineId, Sha, UserId};

/// The status of a car.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CarStatus {
    /// Validated against the current predecessor (or awaiting its first
    /// validation pipeline). Eligible to merge once first in line and its
    /// pipeline has succeeded.
    Fresh,

    /// The predecessor changed since the car was last validated. Must be
    /// re-validated before merging.
    Stale,

    /// Terminal success.
    Merged,
}

impl CarStatus {
    /// Returns true if the car still occupies a slot in the active queue.
    pub fn is_active(&self) -> bool {
        matches!(self, CarStatus::Fresh | CarStatus::Stale)
    }

    /// Checks whether a transition to `target` is valid.
    ///
    /// Valid transitions:
    /// - Fresh -> Stale (a car ahead was removed or merged)
    /// - Stale -> Fresh (re-validated against the current predecessor)
    /// - Fresh -> Merged (first in line, pipeline succeeded)
    pub fn can_transition_to(&self, target: CarStatus) -> bool {
        matches!(
            (self, target),
            (CarStatus::Fresh, CarStatus::Stale)
                | (CarStatus::Stale, CarStatus::Fresh)
                | (CarStatus::Fresh, CarStatus::Merged)
        )
    }
}

/// The validation attached to a car: which pipeline vouches for it, and which
/// predecessor the pipeline was computed against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarValidation {
    /// The validation pipeline.
    pub pipeline: PipelineId,

    /// Insertion sequence of the car directly ahead when the pipeline was
    /// created. `None` means the car was validated as head of the train
    /// (against the target branch tip).
    pub predecessor_seq: Option<u64>,
}

/// One merge request's slot in a merge train.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Car {
    pub merge_request: MergeRequestId,

    /// The user who queued the car.
    pub queued_by: UserId,

    pub queued_at: DateTime<Utc>,

    /// Monotonic insertion sequence within the train. Defines merge order.
    pub seq: u64,

    pub status: CarStatus,

    /// Current validation, absent until the first pipeline is attached.
    pub validation: Option<CarValidation>,

    /// The speculative merge commit the validation pipeline ran against.
    pub train_ref: Option<Sha>,
}

impl Car {
    pub fn new(merge_request: MergeRequestId, queued_by: UserId, seq: u64) -> Self {
        Car {
            merge_request,
            queued_by,
            queued_at: Utc::now(),
            seq,
            status: CarStatus::Fresh,
            validation: None,
            train_ref: None,
        }
    }

    /// The validation pipeline, if one is attached.
    pub fn pipeline(&self) -> Option<PipelineId> {
        self.validation.as_ref().map(|v| v.pipeline)
    }

    /// Returns true if the car's validation no longer reflects
    /// `current_predecessor_seq` (the seq of the car directly ahead right
    /// now, `None` for head of train).
    ///
    /// A car with no validation at all is always outdated: it has nothing
    /// vouching for it yet.
    pub fn is_outdated(&self, current_predecessor_seq: Option<u64>) -> bool {
        match &self.validation {
            Some(v) => v.predecessor_seq != current_predecessor_seq,
            None => true,
        }
    }

    /// Marks the car stale. No-op unless the car is fresh.
    pub fn mark_stale(&mut self) -> bool {
        if self.status.can_transition_to(CarStatus::Stale) {
            self.status = CarStatus::Stale;
            true
        } else {
            false
        }
    }

    /// Attaches a validation pipeline computed against the current
    /// predecessor, making the car fresh.
    pub fn attach_validation(
        &mut self,
        pipeline: PipelineId,
        train_ref: Sha,
        predecessor_seq: Option<u64>,
    ) {
        self.validation = Some(CarValidation {
            pipeline,
            predecessor_seq,
        });
        self.train_ref = Some(train_ref);
        self.status = CarStatus::Fresh;
    }
}
