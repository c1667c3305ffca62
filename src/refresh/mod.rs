//! Asynchronous train refresh.
//!
//! Refresh is an at-least-once work item keyed by train. `RefreshBus` is the
//! sending half: an unbounded channel with a pending-key set so that a train
//! with a signal already queued is not queued again. `RefreshWorker` drains
//! the receiving half on a tokio task and runs the service's refresh for each
//! key, until shut down via a `CancellationToken`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::service::AutoMergeService;
use crate::types::TrainKey;

/// The sending half of the refresh channel, with duplicate suppression.
#[derive(Clone)]
pub struct RefreshBus {
    tx: mpsc::UnboundedSender<TrainKey>,
    pending: Arc<Mutex<HashSet<TrainKey>>>,
}

/// The receiving half. Removing a key from the pending set happens on
/// receive, so a refresh request arriving mid-processing queues a fresh
/// signal rather than being lost.
pub struct RefreshReceiver {
    rx: mpsc::UnboundedReceiver<TrainKey>,
    pending: Arc<Mutex<HashSet<TrainKey>>>,
}

impl RefreshBus {
    pub fn channel() -> (RefreshBus, RefreshReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(Mutex::new(HashSet::new()));
        (
            RefreshBus {
                tx,
                pending: pending.clone(),
            },
            RefreshReceiver { rx, pending },
        )
    }

    /// Enqueues a refresh signal unless one for the same train is already
    /// pending. Returns whether a signal was enqueued.
    pub fn request(&self, key: TrainKey) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if !pending.insert(key.clone()) {
            return false;
        }
        drop(pending);

        if self.tx.send(key.clone()).is_err() {
            // Receiver gone (shutdown); un-mark so the state stays accurate.
            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
            return false;
        }
        true
    }

    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl RefreshReceiver {
    pub async fn recv(&mut self) -> Option<TrainKey> {
        let key = self.rx.recv().await?;
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
        Some(key)
    }

    /// Non-blocking receive, used by synchronous tests to drain the channel.
    pub fn try_recv(&mut self) -> Option<TrainKey> {
        let key = self.rx.try_recv().ok()?;
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
        Some(key)
    }
}

/// Drains refresh signals and applies them to the service.
pub struct RefreshWorker {
    service: Arc<AutoMergeService>,
    receiver: RefreshReceiver,
    shutdown: CancellationToken,
}

impl RefreshWorker {
    pub fn new(
        service: Arc<AutoMergeService>,
        receiver: RefreshReceiver,
        shutdown: CancellationToken,
    ) -> Self {
        RefreshWorker {
            service,
            receiver,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("refresh worker shutting down");
                    break;
                }
                key = self.receiver.recv() => {
                    match key {
                        Some(key) => {
                            tracing::debug!(train = %key, "refreshing train");
                            self.service.refresh_train(&key);
                        }
                        None => break,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProjectId;

    fn key(project: u64) -> TrainKey {
        TrainKey::new(ProjectId(project), "main")
    }

    #[test]
    fn duplicate_requests_are_suppressed_while_pending() {
        let (bus, mut rx) = RefreshBus::channel();

        assert!(bus.request(key(1)));
        assert!(!bus.request(key(1)));
        assert!(bus.request(key(2)));
        assert_eq!(bus.pending_count(), 2);

        assert_eq!(rx.try_recv(), Some(key(1)));
        assert_eq!(rx.try_recv(), Some(key(2)));
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn a_received_key_may_be_requested_again() {
        let (bus, mut rx) = RefreshBus::channel();

        assert!(bus.request(key(1)));
        assert_eq!(rx.try_recv(), Some(key(1)));
        assert_eq!(bus.pending_count(), 0);

        assert!(bus.request(key(1)));
        assert_eq!(rx.try_recv(), Some(key(1)));
    }

    #[test]
    fn request_after_receiver_drop_reports_failure() {
        let (bus, rx) = RefreshBus::channel();
        drop(rx);
        assert!(!bus.request(key(1)));
        assert_eq!(bus.pending_count(), 0);
    }

    #[tokio::test]
    async fn recv_clears_pending() {
        let (bus, mut rx) = RefreshBus::channel();
        bus.request(key(3));
        assert_eq!(rx.recv().await, Some(key(3)));
        assert_eq!(bus.pending_count(), 0);
    }

    #[tokio::test]
    async fn worker_stops_on_cancellation() {
        let (bus, rx) = RefreshBus::channel();
        let service = Arc::new(AutoMergeService::builder().build(bus));
        let shutdown = CancellationToken::new();
        let worker = RefreshWorker::new(service, rx, shutdown.clone());

        let handle = tokio::spawn(worker.run());
        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn worker_stops_when_all_senders_drop() {
        let (bus, rx) = RefreshBus::channel();
        // The service gets its own channel so `bus` is the only sender for
        // the worker's receiver.
        let (service_bus, _service_rx) = RefreshBus::channel();
        let service = Arc::new(AutoMergeService::builder().build(service_bus));
        let worker = RefreshWorker::new(service, rx, CancellationToken::new());

        let handle = tokio::spawn(worker.run());
        drop(bus);
        handle.await.unwrap();
    }
}
