//! HTTP surface for the orchestration service.
//!
//! # Endpoints
//!
//! - `GET /health` - liveness probe
//! - `GET /trains/{project}/{branch}` - a train's queue as JSON
//! - `POST /trains/refresh` - schedules an asynchronous refresh (202)

use std::sync::Arc;

use crate::service::AutoMergeService;

pub mod health;
pub mod trains;

pub use health::health_handler;
pub use trains::{refresh_handler, train_state_handler};

/// Shared application state, passed to handlers via axum's `State`
/// extractor.
#[derive(Clone)]
pub struct AppState {
    service: Arc<AutoMergeService>,
}

impl AppState {
    pub fn new(service: Arc<AutoMergeService>) -> Self {
        AppState { service }
    }

    pub fn service(&self) -> &AutoMergeService {
        &self.service
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/trains/refresh", post(refresh_handler))
        .route("/trains/{project}/{branch}", get(train_state_handler))
        .route("/health", get(health_handler))
        .with_state(app_state)
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::refresh::{RefreshBus, RefreshReceiver};
    use crate::train::MERGED_HISTORY_LIMIT;
    use crate::types::{MergeRequestId, ProjectId, TrainKey, UserId};

    fn test_state() -> (AppState, RefreshReceiver) {
        let (bus, receiver) = RefreshBus::channel();
        let service = Arc::new(AutoMergeService::builder().build(bus));
        (AppState::new(service), receiver)
    }

    fn seed_train(state: &AppState, cars: u64) -> TrainKey {
        let key = TrainKey::new(ProjectId(1), "main");
        state.service().update(|world| {
            let train = world.train_entry(&key);
            for i in 0..cars {
                train.enqueue(MergeRequestId(i + 1), UserId(7), Utc::now());
            }
        });
        key
    }

    // ─── Health ───

    #[tokio::test]
    async fn health_returns_200() {
        let (state, _rx) = test_state();
        let app = build_router(state);

        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"OK");
    }

    // ─── Train inspection ───

    #[tokio::test]
    async fn train_state_returns_queue_in_order() {
        let (state, _rx) = test_state();
        seed_train(&state, 2);
        let app = build_router(state);

        let request = Request::builder()
            .uri("/trains/1/main")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let view: trains::TrainView = serde_json::from_slice(&body).unwrap();
        assert_eq!(view.project, ProjectId(1));
        assert_eq!(view.target_branch, "main");
        assert_eq!(view.cars.len(), 2);
        assert_eq!(view.cars[0].merge_request, MergeRequestId(1));
        assert_eq!(view.cars[0].position, 0);
        assert_eq!(view.cars[1].position, 1);
        assert!(view.merged.is_empty());
    }

    #[tokio::test]
    async fn train_state_includes_merged_history() {
        let (state, _rx) = test_state();
        let key = seed_train(&state, 2);
        state.service().update(|world| {
            if let Some(train) = world.train_mut(&key) {
                train.complete_head_merge();
            }
        });
        let app = build_router(state);

        let request = Request::builder()
            .uri("/trains/1/main")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let view: trains::TrainView = serde_json::from_slice(&body).unwrap();

        assert_eq!(view.cars.len(), 1);
        assert_eq!(view.merged, vec![MergeRequestId(1)]);
        assert!(view.merged.len() <= MERGED_HISTORY_LIMIT);
    }

    #[tokio::test]
    async fn unknown_train_returns_404() {
        let (state, _rx) = test_state();
        let app = build_router(state);

        let request = Request::builder()
            .uri("/trains/9/release")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    // ─── Refresh ───

    #[tokio::test]
    async fn refresh_returns_202_and_signals_the_bus() {
        let (state, mut rx) = test_state();
        let key = seed_train(&state, 1);
        let app = build_router(state);

        let body = serde_json::json!({ "project": 1, "target_branch": "main" });
        let request = Request::builder()
            .method("POST")
            .uri("/trains/refresh")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(rx.try_recv(), Some(key));
    }

    #[tokio::test]
    async fn refresh_of_an_empty_train_is_accepted_but_not_scheduled() {
        let (state, mut rx) = test_state();
        let app = build_router(state);

        let body = serde_json::json!({ "project": 1, "target_branch": "main" });
        let request = Request::builder()
            .method("POST")
            .uri("/trains/refresh")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(rx.try_recv(), None);
    }
}
