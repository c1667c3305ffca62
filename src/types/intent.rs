//! Auto-merge strategies and the per-merge-request arming record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{Sha, UserId};

/// The closed set of auto-merge strategies.
///
/// The "when checks pass" flavors are the modern, flag-gated replacements for
/// the "when pipeline succeeds" flavors; exactly one of each pair is ever
/// available at a time, selected by a single feature toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// The merge request has a car on the train.
    MergeTrain,

    /// Merge directly once the head pipeline succeeds.
    MergeWhenPipelineSucceeds,

    /// Merge directly once all mergeability checks pass.
    MergeWhenChecksPass,

    /// Enter the train once the head pipeline succeeds.
    AddToTrainWhenPipelineSucceeds,

    /// Enter the train once all mergeability checks pass.
    AddToTrainWhenChecksPass,
}

impl StrategyKind {
    /// All strategies in selection preference order: train strategies first,
    /// modern flavors before their legacy counterparts.
    pub const ALL: [StrategyKind; 5] = [
        StrategyKind::MergeTrain,
        StrategyKind::AddToTrainWhenChecksPass,
        StrategyKind::AddToTrainWhenPipelineSucceeds,
        StrategyKind::MergeWhenChecksPass,
        StrategyKind::MergeWhenPipelineSucceeds,
    ];

    /// The snake_case name used in system notes and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::MergeTrain => "merge_train",
            StrategyKind::MergeWhenPipelineSucceeds => "merge_when_pipeline_succeeds",
            StrategyKind::MergeWhenChecksPass => "merge_when_checks_pass",
            StrategyKind::AddToTrainWhenPipelineSucceeds => {
                "add_to_merge_train_when_pipeline_succeeds"
            }
            StrategyKind::AddToTrainWhenChecksPass => "add_to_merge_train_when_checks_pass",
        }
    }

    /// Returns true if arming this strategy places (or will place) a car on
    /// the train.
    pub fn targets_train(&self) -> bool {
        matches!(
            self,
            StrategyKind::MergeTrain
                | StrategyKind::AddToTrainWhenPipelineSucceeds
                | StrategyKind::AddToTrainWhenChecksPass
        )
    }

    /// Returns true if `process` is gated on a pipeline reaching success.
    pub fn pipeline_gated(&self) -> bool {
        matches!(
            self,
            StrategyKind::MergeWhenPipelineSucceeds | StrategyKind::AddToTrainWhenPipelineSucceeds
        )
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The per-merge-request record of an armed auto-merge.
///
/// Created by a strategy's `execute`, cleared by `cancel`, `abort`, or a
/// successful merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoMergeIntent {
    /// Which strategy was armed.
    pub strategy: StrategyKind,

    /// The user who armed it.
    pub armed_by: UserId,

    /// When it was armed.
    pub armed_at: DateTime<Utc>,

    /// The diff head SHA at arming time, recorded for strategies gated on
    /// pipeline success so the system note can document what was validated.
    pub sha_at_arming: Option<Sha>,
}

impl AutoMergeIntent {
    pub fn new(strategy: StrategyKind, armed_by: UserId, sha_at_arming: Option<Sha>) -> Self {
        AutoMergeIntent {
            strategy,
            armed_by,
            armed_at: Utc::now(),
            sha_at_arming,
        }
    }
}
