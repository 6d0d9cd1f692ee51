//! Mirror consumer pool: applies queued tasks until the projection
//! matches the authoritative store.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::model::{MirrorOp, MirrorRecord, MirrorTask};
use crate::observability::Metrics;
use crate::store::{DocStore, StoreError};

use super::broker::TaskEnvelope;
use super::queue::MirrorQueue;

/// Apply one mirror task against the store.
///
/// Upsert and Update resolve the *current* authoritative record rather
/// than trusting the enqueue-time payload: the desired mirror state is a
/// pure function of the source record, so applying the same task any
/// number of times, in any interleaving with newer tasks, converges to
/// `is_public && !is_deleted`. Remove is a plain delete-if-exists.
pub fn apply_task(store: &DocStore, task: &MirrorTask) -> Result<(), StoreError> {
    match task.op {
        MirrorOp::Remove => store.remove_mirror(&task.record_id),
        MirrorOp::Upsert | MirrorOp::Update => {
            match store.get_record(&task.uid, &task.record_id)? {
                Some(record) if record.is_mirrorable() => {
                    store.put_mirror(&MirrorRecord::project(&record))
                }
                // Gone, deleted, or no longer public: converge to absent.
                _ => store.remove_mirror(&task.record_id),
            }
        }
    }
}

/// Spawn one consumer per receiver. Each worker retries a task up to
/// `max_attempts` with a flat backoff, acks on success, and parks the
/// task in the DLQ once the budget is spent.
pub fn spawn_workers(
    receivers: Vec<mpsc::Receiver<TaskEnvelope>>,
    store: Arc<DocStore>,
    queue: Arc<MirrorQueue>,
    metrics: Arc<Metrics>,
    max_attempts: u32,
    retry_backoff: Duration,
) -> Vec<JoinHandle<()>> {
    receivers
        .into_iter()
        .enumerate()
        .map(|(worker_id, mut rx)| {
            let store = store.clone();
            let queue = queue.clone();
            let metrics = metrics.clone();
            tokio::spawn(async move {
                info!(worker_id, "Mirror worker started");
                while let Some(envelope) = rx.recv().await {
                    run_task(
                        worker_id,
                        &envelope,
                        &store,
                        &queue,
                        &metrics,
                        max_attempts,
                        retry_backoff,
                    )
                    .await;
                }
                info!(worker_id, "Mirror worker stopped");
            })
        })
        .collect()
}

async fn run_task(
    worker_id: usize,
    envelope: &TaskEnvelope,
    store: &DocStore,
    queue: &MirrorQueue,
    metrics: &Metrics,
    max_attempts: u32,
    retry_backoff: Duration,
) {
    let seq = envelope.seq;
    let mut last_error = String::new();

    for attempt in 1..=max_attempts.max(1) {
        match apply_task(store, &envelope.task) {
            Ok(()) => {
                if let Err(err) = queue.ack(seq) {
                    // The task will be replayed and re-applied; harmless.
                    warn!(worker_id, seq, error = %err, "Ack failed after apply");
                }
                metrics.mirror_task_applied();
                debug!(worker_id, seq, op = ?envelope.task.op, "Mirror task applied");
                return;
            }
            Err(err) => {
                last_error = err.to_string();
                warn!(worker_id, seq, attempt, error = %err, "Mirror task apply failed");
                tokio::time::sleep(retry_backoff).await;
            }
        }
    }

    error!(worker_id, seq, "Mirror task exhausted retries, moving to DLQ");
    if let Err(err) = queue.move_to_dlq(seq, last_error, max_attempts) {
        error!(worker_id, seq, error = %err, "Failed to move mirror task to DLQ");
    }
}
