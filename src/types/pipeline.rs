//! Pipeline and job state facts.
//!
//! The core never runs CI itself; it observes pipeline and job states
//! supplied by the surrounding system and reacts to them. These enums mirror
//! the states the strategies consult.

use serde::{Deserialize, Serialize};

use super::ids::{PipelineId, Sha};

/// The state of a CI pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    /// Created but not yet picked up by a runner.
    Created,

    /// Jobs are executing.
    Running,

    /// All jobs finished successfully.
    Succeeded,

    /// At least one required job failed.
    Failed,

    /// Waiting on a manual job. Not treated as a failure by the train.
    Blocked,

    /// Cooperative cancellation in progress. Not treated as a failure.
    Canceling,

    /// Canceled.
    Canceled,
}

impl PipelineStatus {
    /// Returns true if the pipeline has reached a terminal state.
    pub fn is_complete(&self) -> bool {
        matches!(
            self,
            PipelineStatus::Succeeded | PipelineStatus::Failed | PipelineStatus::Canceled
        )
    }

    /// Returns true if the pipeline is still making progress.
    pub fn is_active(&self) -> bool {
        matches!(self, PipelineStatus::Created | PipelineStatus::Running)
    }

    /// Returns true if the pipeline finished successfully.
    pub fn succeeded(&self) -> bool {
        matches!(self, PipelineStatus::Succeeded)
    }

    /// Returns true if the pipeline is in a state the merge-train strategy
    /// accepts as a head-pipeline precondition: complete, blocked on a manual
    /// job, or mid-cancellation.
    pub fn settled_for_train(&self) -> bool {
        self.is_complete()
            || matches!(self, PipelineStatus::Blocked | PipelineStatus::Canceling)
    }

    /// Returns true if a head car's validation pipeline permits the merge:
    /// success, or a blocked/canceling state not treated as a failure.
    pub fn passes_for_merge(&self) -> bool {
        matches!(
            self,
            PipelineStatus::Succeeded | PipelineStatus::Blocked | PipelineStatus::Canceling
        )
    }
}

/// The state of a single job within a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Cooperative cancellation was requested; the job is winding down.
    Canceling,
    Canceled,
}

impl JobStatus {
    /// Returns true if the job is still occupying a runner.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

/// A job within a validation pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    pub status: JobStatus,
}

impl Job {
    pub fn new(name: impl Into<String>, status: JobStatus) -> Self {
        Job {
            name: name.into(),
            status,
        }
    }
}

/// A CI pipeline as observed by the orchestration core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: PipelineId,

    /// The commit the pipeline validates. For train validation pipelines this
    /// is the speculative merge commit (the "train ref").
    pub sha: Sha,

    pub status: PipelineStatus,

    pub jobs: Vec<Job>,

    /// Whether the execution environment supports cooperative (graceful)
    /// cancellation. When true, in-flight jobs transition to `Canceling`
    /// rather than straight to `Canceled`.
    pub cooperative_cancellation: bool,
}

impl Pipeline {
    pub fn new(id: PipelineId, sha: Sha, status: PipelineStatus) -> Self {
        Pipeline {
            id,
            sha,
            status,
            jobs: Vec::new(),
            cooperative_cancellation: false,
        }
    }

    /// Adds a job. Builder-style, used mostly by tests and fakes.
    pub fn with_job(mut self, job: Job) -> Self {
        self.jobs.push(job);
        self
    }

    /// Enables cooperative cancellation for this pipeline's jobs.
    pub fn with_cooperative_cancellation(mut self) -> Self {
        self.cooperative_cancellation = true;
        self
    }

    /// Cancels all in-flight jobs.
    ///
    /// Jobs transition to `Canceling` when the pipeline supports cooperative
    /// cancellation, otherwise directly to `Canceled`. The pipeline status
    /// follows the same rule.
    pub fn cancel_jobs(&mut self) {
        let target = if self.cooperative_cancellation {
            JobStatus::Canceling
        } else {
            JobStatus::Canceled
        };

        let mut any_in_flight = false;
        for job in &mut self.jobs {
            if job.status.is_in_flight() {
                job.status = target;
                any_in_flight = true;
            }
        }

        if any_in_flight || self.status.is_active() {
            self.status = if self.cooperative_cancellation {
                PipelineStatus::Canceling
            } else {
                PipelineStatus::Canceled
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_status() -> impl Strategy<Value = PipelineStatus> {
        prop_oneof![
            Just(PipelineStatus::Created),
            Just(PipelineStatus::Running),
            Just(PipelineStatus::Succeeded),
            Just(PipelineStatus::Failed),
            Just(PipelineStatus::Blocked),
            Just(PipelineStatus::Canceling),
            Just(PipelineStatus::Canceled),
        ]
    }

    mod pipeline_status {
        use super::*;

        proptest! {
            #[test]
            fn serde_roundtrip(status in arb_status()) {
                let json = serde_json::to_string(&status).unwrap();
                let parsed: PipelineStatus = serde_json::from_str(&json).unwrap();
                prop_assert_eq!(status, parsed);
            }

            #[test]
            fn active_and_complete_are_disjoint(status in arb_status()) {
                prop_assert!(!(status.is_active() && status.is_complete()));
            }
        }

        #[test]
        fn passes_for_merge_accepts_blocked_and_canceling() {
            assert!(PipelineStatus::Succeeded.passes_for_merge());
            assert!(PipelineStatus::Blocked.passes_for_merge());
            assert!(PipelineStatus::Canceling.passes_for_merge());
            assert!(!PipelineStatus::Failed.passes_for_merge());
            assert!(!PipelineStatus::Canceled.passes_for_merge());
            assert!(!PipelineStatus::Running.passes_for_merge());
        }

        #[test]
        fn settled_for_train_accepts_blocked_and_canceling() {
            assert!(PipelineStatus::Succeeded.settled_for_train());
            assert!(PipelineStatus::Failed.settled_for_train());
            assert!(PipelineStatus::Blocked.settled_for_train());
            assert!(PipelineStatus::Canceling.settled_for_train());
            assert!(!PipelineStatus::Running.settled_for_train());
            assert!(!PipelineStatus::Created.settled_for_train());
        }
    }

    mod cancel_jobs {
        use super::*;
        use crate::types::PipelineId;

        fn running_pipeline(cooperative: bool) -> Pipeline {
            let mut p = Pipeline::new(
                PipelineId(1),
                Sha::new("a".repeat(40)),
                PipelineStatus::Running,
            )
            .with_job(Job::new("build", JobStatus::Succeeded))
            .with_job(Job::new("test", JobStatus::Running));
            p.cooperative_cancellation = cooperative;
            p
        }

        #[test]
        fn cooperative_cancellation_transitions_to_canceling() {
            let mut p = running_pipeline(true);
            p.cancel_jobs();
            assert_eq!(p.jobs[1].status, JobStatus::Canceling);
            assert_eq!(p.status, PipelineStatus::Canceling);
        }

        #[test]
        fn hard_cancellation_transitions_to_canceled() {
            let mut p = running_pipeline(false);
            p.cancel_jobs();
            assert_eq!(p.jobs[1].status, JobStatus::Canceled);
            assert_eq!(p.status, PipelineStatus::Canceled);
        }

        #[test]
        fn finished_jobs_are_untouched() {
            let mut p = running_pipeline(false);
            p.cancel_jobs();
            assert_eq!(p.jobs[0].status, JobStatus::Succeeded);
        }

        #[test]
        fn completed_pipeline_status_is_preserved() {
            let mut p = Pipeline::new(
                PipelineId(2),
                Sha::new("b".repeat(40)),
                PipelineStatus::Succeeded,
            );
            p.cancel_jobs();
            assert_eq!(p.status, PipelineStatus::Succeeded);
        }
    }
}
