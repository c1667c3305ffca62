//! Merge request facts consumed at the boundary.
//!
//! The surrounding system owns merge requests; the core only needs the facts
//! the strategies consult. `MergeRequest` is the core's snapshot of those
//! facts, updated by the caller as the real record changes.

use serde::{Deserialize, Serialize};

use super::ids::{MergeRequestId, PipelineId, ProjectId, TrainKey, UserId};
use super::intent::AutoMergeIntent;

/// The state of the mergeability check machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    /// No check has run yet.
    Unchecked,

    /// A check is in progress.
    Checking,

    /// All checks passed.
    CanBeMerged,

    /// At least one check failed.
    CannotBeMerged,
}

impl MergeStatus {
    /// Returns true when a check is pending or running. The train strategies
    /// treat this as "do not give up yet" rather than as a failure.
    pub fn in_progress_or_unchecked(&self) -> bool {
        matches!(self, MergeStatus::Unchecked | MergeStatus::Checking)
    }

    pub fn can_be_merged(&self) -> bool {
        matches!(self, MergeStatus::CanBeMerged)
    }
}

/// A merge request snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub id: MergeRequestId,
    pub project: ProjectId,
    pub author: UserId,
    pub target_branch: String,
    pub source_branch: String,

    pub draft: bool,
    pub merged: bool,

    /// The project has CI configured for this merge request.
    pub has_ci_enabled: bool,

    /// The source branch lives in a fork. Trains do not accept fork MRs.
    pub for_fork: bool,

    /// Blocked by other open merge requests (licensed feature).
    pub merge_blocked_by_other_mrs: bool,

    pub merge_status: MergeStatus,

    /// The pipeline validating the current diff head, if any.
    pub diff_head_pipeline: Option<PipelineId>,

    /// The armed auto-merge, if any.
    pub auto_merge: Option<AutoMergeIntent>,
}

impl MergeRequest {
    /// Creates an open, non-draft merge request with no pipeline and no
    /// armed auto-merge.
    pub fn new(
        id: MergeRequestId,
        project: ProjectId,
        author: UserId,
        source_branch: impl Into<String>,
        target_branch: impl Into<String>,
    ) -> Self {
        MergeRequest {
            id,
            project,
            author,
            target_branch: target_branch.into(),
            source_branch: source_branch.into(),
            draft: false,
            merged: false,
            has_ci_enabled: true,
            for_fork: false,
            merge_blocked_by_other_mrs: false,
            merge_status: MergeStatus::Unchecked,
            diff_head_pipeline: None,
            auto_merge: None,
        }
    }

    /// The train this merge request targets.
    pub fn train_key(&self) -> TrainKey {
        TrainKey::new(self.project, self.target_branch.clone())
    }

    /// Returns true if the record itself permits merging: open and not a
    /// draft. Check outcomes are a separate question (`merge_status`).
    pub fn mergeable_state(&self) -> bool {
        !self.merged && !self.draft
    }

    /// Returns true if all mergeability checks currently pass.
    pub fn mergeability_checks_pass(&self) -> bool {
        self.mergeable_state() && self.merge_status.can_be_merged()
    }

    /// Returns true if an auto-merge is armed.
    pub fn auto_merge_enabled(&self) -> bool {
        self.auto_merge.is_some()
    }
}
