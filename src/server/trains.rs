//! Train endpoints: state inspection and refresh scheduling.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::AppState;
use crate::types::{CarStatus, MergeRequestId, PipelineId, ProjectId, TrainKey, UserId};

/// Errors returned by the train endpoints.
#[derive(Debug, Error)]
pub enum TrainError {
    /// No train exists for the requested project and branch.
    #[error("no merge train for {key}")]
    NotFound { key: TrainKey },
}

impl IntoResponse for TrainError {
    fn into_response(self) -> Response {
        match &self {
            TrainError::NotFound { .. } => {
                (StatusCode::NOT_FOUND, self.to_string()).into_response()
            }
        }
    }
}

/// One car in the inspection view.
#[derive(Debug, Serialize, Deserialize)]
pub struct CarView {
    pub merge_request: MergeRequestId,
    pub position: usize,
    pub status: CarStatus,
    pub queued_by: UserId,
    pub pipeline: Option<PipelineId>,
}

/// A train's queue as JSON.
#[derive(Debug, Serialize, Deserialize)]
pub struct TrainView {
    pub project: ProjectId,
    pub target_branch: String,
    pub cars: Vec<CarView>,
    /// Recently merged merge requests, oldest first.
    pub merged: Vec<MergeRequestId>,
}

/// Train inspection handler.
///
/// # Response
///
/// - 200 OK with a [`TrainView`] body
/// - 404 Not Found if the branch has no train
pub async fn train_state_handler(
    State(app_state): State<AppState>,
    Path((project, branch)): Path<(u64, String)>,
) -> Result<Json<TrainView>, TrainError> {
    let key = TrainKey::new(ProjectId(project), branch);
    app_state.service().read(|world| {
        let train = world
            .train(&key)
            .ok_or_else(|| TrainError::NotFound { key: key.clone() })?;
        Ok(Json(TrainView {
            project: key.project,
            target_branch: key.target_branch.clone(),
            cars: train
                .cars()
                .iter()
                .enumerate()
                .map(|(position, car)| CarView {
                    merge_request: car.merge_request,
                    position,
                    status: car.status,
                    queued_by: car.queued_by,
                    pipeline: car.pipeline(),
                })
                .collect(),
            merged: train.merged_history().map(|c| c.merge_request).collect(),
        }))
    })
}

/// Body of `POST /trains/refresh`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub project: u64,
    pub target_branch: String,
}

/// Drops a refresh signal on the bus. Always 202: the refresh itself is
/// asynchronous and idempotent.
pub async fn refresh_handler(
    State(app_state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> StatusCode {
    let key = TrainKey::new(ProjectId(body.project), body.target_branch);
    app_state.service().request_refresh(&key);
    StatusCode::ACCEPTED
}
