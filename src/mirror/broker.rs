use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::model::MirrorTask;

use super::queue::{MirrorQueue, Result};

/// A mirror task paired with its durable sequence number.
#[derive(Clone, Debug)]
pub struct TaskEnvelope {
    pub seq: u64,
    pub task: MirrorTask,
}

/// Distributes mirror tasks to the consumer pool.
///
/// Persist-first: a task is written to the durable queue before any
/// worker sees it, so a dead worker or full channel can never lose it —
/// the startup replay re-delivers whatever was not acknowledged.
/// Distribution is round-robin over bounded channels; a full channel is
/// backpressure on the enqueuing request.
pub struct MirrorBroker {
    queue: Arc<MirrorQueue>,
    worker_channels: Vec<mpsc::Sender<TaskEnvelope>>,
    next_worker: AtomicUsize,
}

impl MirrorBroker {
    /// Returns the broker plus one receiver per worker, for spawning the
    /// consumer pool.
    pub fn new(
        queue: Arc<MirrorQueue>,
        num_workers: usize,
        channel_size: usize,
    ) -> (Self, Vec<mpsc::Receiver<TaskEnvelope>>) {
        info!(num_workers, channel_size, "Creating mirror broker");

        let mut worker_channels = Vec::with_capacity(num_workers);
        let mut worker_receivers = Vec::with_capacity(num_workers);
        for worker_id in 0..num_workers {
            let (tx, rx) = mpsc::channel(channel_size);
            worker_channels.push(tx);
            worker_receivers.push(rx);
            debug!(worker_id, "Created mirror worker channel");
        }

        let broker = Self {
            queue,
            worker_channels,
            next_worker: AtomicUsize::new(0),
        };
        (broker, worker_receivers)
    }

    /// Persist the task, then hand it to the next worker.
    pub async fn enqueue(&self, task: MirrorTask) -> Result<u64> {
        let seq = self.queue.enqueue(&task)?;
        self.dispatch(TaskEnvelope { seq, task }).await;
        Ok(seq)
    }

    /// Re-dispatch every unacknowledged task. Called once at startup,
    /// after the workers are running.
    pub async fn replay(&self) -> Result<usize> {
        let pending = self.queue.pending()?;
        let count = pending.len();
        if count > 0 {
            info!(count, "Replaying unacknowledged mirror tasks");
        }
        for (seq, task) in pending {
            self.dispatch(TaskEnvelope { seq, task }).await;
        }
        Ok(count)
    }

    async fn dispatch(&self, envelope: TaskEnvelope) {
        let worker_idx =
            self.next_worker.fetch_add(1, Ordering::Relaxed) % self.worker_channels.len();
        let seq = envelope.seq;
        if self.worker_channels[worker_idx].send(envelope).await.is_err() {
            // Worker is gone; the task is already durable and will be
            // picked up by the next replay.
            warn!(seq, worker_idx, "Mirror worker channel closed, task stays queued");
        } else {
            debug!(seq, worker_idx, "Mirror task dispatched");
        }
    }

    pub fn num_workers(&self) -> usize {
        self.worker_channels.len()
    }

    pub fn health_check(&self) -> bool {
        self.worker_channels.iter().all(|ch| !ch.is_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn round_robin_across_workers() {
        let tmp = TempDir::new().unwrap();
        let queue = Arc::new(MirrorQueue::open(tmp.path()).unwrap());
        let (broker, mut receivers) = MirrorBroker::new(queue, 2, 10);

        for i in 0..4 {
            broker
                .enqueue(MirrorTask::remove("u1", &format!("g{i}")))
                .await
                .unwrap();
        }

        for (worker_id, expected) in [(0usize, [0u64, 2]), (1, [1, 3])] {
            for seq in expected {
                let envelope = receivers[worker_id].recv().await.unwrap();
                assert_eq!(envelope.seq, seq);
            }
        }
    }

    #[tokio::test]
    async fn task_survives_dead_worker() {
        let tmp = TempDir::new().unwrap();
        let queue = Arc::new(MirrorQueue::open(tmp.path()).unwrap());
        let (broker, receivers) = MirrorBroker::new(queue.clone(), 1, 10);
        drop(receivers);

        let seq = broker
            .enqueue(MirrorTask::remove("u1", "g1"))
            .await
            .unwrap();
        assert_eq!(queue.get_task(seq).unwrap().unwrap().record_id, "g1");
        assert!(!broker.health_check());
    }

    #[tokio::test]
    async fn replay_redelivers_unacked_tasks() {
        let tmp = TempDir::new().unwrap();
        let queue = Arc::new(MirrorQueue::open(tmp.path()).unwrap());
        queue.enqueue(&MirrorTask::remove("u1", "g1")).unwrap();
        queue.enqueue(&MirrorTask::remove("u1", "g2")).unwrap();
        queue.ack(0).unwrap();

        let (broker, mut receivers) = MirrorBroker::new(queue, 1, 10);
        let replayed = broker.replay().await.unwrap();
        assert_eq!(replayed, 1);

        let envelope = receivers[0].recv().await.unwrap();
        assert_eq!(envelope.seq, 1);
        assert_eq!(envelope.task.record_id, "g2");
    }
}
