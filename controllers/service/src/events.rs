//! Lifecycle events and the per-worker queues that carry them.
//!
//! Each event is routed by a stable hash of its `namespace/name` so all
//! events of one Service are handled in order by the same worker.

use crate::error::ControllerError;
use crate::reconciler::ReconcileEngine;
use resource_gateway::ServiceRecord;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, info, info_span};

/// Capacity of each worker queue
pub const QUEUE_CAPACITY: usize = 256;

/// A notification about one Service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Added(ServiceRecord),
    Updated { old: ServiceRecord, new: ServiceRecord },
    Deleted(ServiceRecord),
}

impl LifecycleEvent {
    /// `namespace/name` of the Service the event is about
    pub fn key(&self) -> String {
        self.record().key()
    }

    fn record(&self) -> &ServiceRecord {
        match self {
            LifecycleEvent::Added(r) | LifecycleEvent::Deleted(r) => r,
            LifecycleEvent::Updated { new, .. } => new,
        }
    }
}

/// Sending half of the worker queues
#[derive(Clone)]
pub struct WorkQueue {
    senders: Vec<mpsc::Sender<LifecycleEvent>>,
}

impl WorkQueue {
    /// Create `workers` bounded queues, returning the receivers in worker order.
    pub fn new(workers: usize, capacity: usize) -> (Self, Vec<mpsc::Receiver<LifecycleEvent>>) {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..workers.max(1)).map(|_| mpsc::channel(capacity)).unzip();
        (Self { senders }, receivers)
    }

    pub fn workers(&self) -> usize {
        self.senders.len()
    }

    /// Index of the worker owning `key`
    pub fn shard(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.senders.len() as u64) as usize
    }

    /// Queue an event, waiting while the owning worker is saturated.
    pub async fn enqueue(&self, event: LifecycleEvent) -> Result<(), ControllerError> {
        let key = event.key();
        let shard = self.shard(&key);
        self.senders[shard]
            .send(event)
            .await
            .map_err(|_| ControllerError::Queue(format!("worker {} stopped, dropping event for {}", shard, key)))
    }
}

/// Drain one queue into the engine until every sender is gone.
pub async fn run_worker(
    id: usize,
    engine: Arc<ReconcileEngine>,
    mut events: mpsc::Receiver<LifecycleEvent>,
) -> Result<(), ControllerError> {
    info!("Starting reconcile worker {}", id);
    while let Some(event) = events.recv().await {
        debug!("Worker {} handling event for {}", id, event.key());
        let span = info_span!(
            "service",
            namespace = %event.record().namespace,
            name = %event.record().name,
            worker = id
        );
        match event {
            LifecycleEvent::Added(record) => engine.on_add(record).instrument(span).await,
            LifecycleEvent::Updated { old, new } => engine.on_update(old, new).instrument(span).await,
            LifecycleEvent::Deleted(record) => engine.on_delete(record).instrument(span).await,
        }
    }
    info!("Reconcile worker {} stopped", id);
    Ok(())
}
