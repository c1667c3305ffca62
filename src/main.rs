use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use merge_conductor::refresh::{RefreshBus, RefreshWorker};
use merge_conductor::server::{build_router, AppState};
use merge_conductor::service::AutoMergeService;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "merge_conductor=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let (bus, receiver) = RefreshBus::channel();
    let service = Arc::new(AutoMergeService::builder().build(bus));

    let shutdown = CancellationToken::new();
    let worker = RefreshWorker::new(service.clone(), receiver, shutdown.clone());
    let worker_handle = tokio::spawn(worker.run());

    let app = build_router(AppState::new(service));

    let addr: SocketAddr = std::env::var("LISTEN_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:3000".to_string())
        .parse()
        .expect("LISTEN_ADDR must be a socket address");
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();

    shutdown.cancel();
    let _ = worker_handle.await;
}
