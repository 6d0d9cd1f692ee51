//! Mirror consistency engine.
//!
//! Keeps the public mirror eventually equal to
//! `is_public && !is_deleted` for every generation record, without
//! adding write latency to the primary request path. Two propagation
//! paths work together:
//!
//! 1. A synchronous best-effort write on latency-sensitive transitions
//!    (completion, visibility change, unpublish). Failures are logged
//!    and swallowed; they never fail the caller's request.
//! 2. A durable queue backstop: every mutation enqueues a task that the
//!    consumer pool applies at-least-once. Upsert resolves the current
//!    authoritative record and Remove is delete-if-exists, so repeated
//!    and concurrent application is safe.

pub mod broker;
pub mod consumer;
pub mod queue;

pub use broker::{MirrorBroker, TaskEnvelope};
pub use consumer::{apply_task, spawn_workers};
pub use queue::{MirrorQueue, MirrorQueueError};

use std::sync::Arc;

use tracing::warn;

use crate::model::{GenerationRecord, MirrorRecord, MirrorTask};
use crate::observability::Metrics;
use crate::store::DocStore;

pub struct MirrorEngine {
    store: Arc<DocStore>,
    broker: Arc<MirrorBroker>,
    metrics: Arc<Metrics>,
}

impl MirrorEngine {
    pub fn new(store: Arc<DocStore>, broker: Arc<MirrorBroker>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            broker,
            metrics,
        }
    }

    /// Best-effort inline upsert. The queue backstop corrects any miss.
    pub fn sync_upsert(&self, record: &GenerationRecord) {
        if !record.is_mirrorable() {
            return self.sync_remove(&record.id);
        }
        if let Err(err) = self.store.put_mirror(&MirrorRecord::project(record)) {
            self.metrics.mirror_sync_failure();
            warn!(id = %record.id, error = %err, "Synchronous mirror upsert failed, queue will correct");
        }
    }

    /// Best-effort inline removal. Issued *before* the authoritative
    /// record is marked deleted/private, so the feed never serves
    /// content the source already considers gone.
    pub fn sync_remove(&self, id: &str) {
        if let Err(err) = self.store.remove_mirror(id) {
            self.metrics.mirror_sync_failure();
            warn!(id, error = %err, "Synchronous mirror removal failed, queue will correct");
        }
    }

    /// Enqueue the durable backstop task. Schedule-and-forget: a queue
    /// hiccup is logged, not surfaced, because the caller's request must
    /// not block on propagation.
    pub async fn schedule(&self, task: MirrorTask) {
        if let Err(err) = self.broker.enqueue(task).await {
            warn!(error = %err, "Failed to enqueue mirror task");
        }
    }
}
