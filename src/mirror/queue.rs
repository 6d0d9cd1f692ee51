use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use thiserror::Error;
use tracing::{debug, info};

use crate::model::{DeadMirrorTask, MirrorTask};

#[derive(Debug, Error)]
pub enum MirrorQueueError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Task not found: seq={0}")]
    TaskNotFound(u64),
}

pub type Result<T> = std::result::Result<T, MirrorQueueError>;

/// Durable, at-least-once queue of mirror tasks.
///
/// Layout:
/// - `tasks` partition: u64 (big-endian) -> MirrorTask (JSON)
/// - `metadata` partition: "next_seq" -> u64 (crash-recovery counter)
/// - `dlq` partition: u64 (big-endian) -> DeadMirrorTask (JSON)
///
/// A task stays in `tasks` until the consumer acknowledges it, so a
/// crash between apply and ack re-delivers on the next startup replay.
/// Tasks are idempotent to apply, which is what makes re-delivery safe.
pub struct MirrorQueue {
    keyspace: Keyspace,
    tasks: PartitionHandle,
    metadata: PartitionHandle,
    dlq: PartitionHandle,
    seq_counter: AtomicU64,
}

impl MirrorQueue {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!(path = %path.as_ref().display(), "Opening mirror queue");

        let keyspace = Config::new(path).open()?;
        let tasks = keyspace.open_partition("tasks", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;
        let dlq = keyspace.open_partition("dlq", PartitionCreateOptions::default())?;

        let current_seq = metadata
            .get(b"next_seq")?
            .map(|bytes| u64::from_be_bytes(bytes.as_ref().try_into().unwrap_or([0u8; 8])))
            .unwrap_or(0);

        info!(current_seq, "Mirror queue opened");

        Ok(Self {
            keyspace,
            tasks,
            metadata,
            dlq,
            seq_counter: AtomicU64::new(current_seq),
        })
    }

    /// Persist a task and return its sequence number. The counter is
    /// persisted after the task so a crash in between re-issues an
    /// already-stored seq, which the idempotent consumer absorbs.
    pub fn enqueue(&self, task: &MirrorTask) -> Result<u64> {
        let seq = self.seq_counter.fetch_add(1, Ordering::SeqCst);
        let value = serde_json::to_vec(task)?;

        self.tasks.insert(seq.to_be_bytes(), value)?;
        self.metadata
            .insert(b"next_seq", (seq + 1).to_be_bytes())?;

        debug!(seq, op = ?task.op, record_id = %task.record_id, "Mirror task enqueued");
        Ok(seq)
    }

    pub fn get_task(&self, seq: u64) -> Result<Option<MirrorTask>> {
        match self.tasks.get(seq.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Acknowledge a successfully applied task. Acking twice, or acking
    /// a task that never existed, is a no-op.
    pub fn ack(&self, seq: u64) -> Result<()> {
        self.tasks.remove(seq.to_be_bytes())?;
        debug!(seq, "Mirror task acked");
        Ok(())
    }

    /// Park a task that exhausted its retry budget.
    pub fn move_to_dlq(&self, seq: u64, error: String, attempts: u32) -> Result<()> {
        let task = self.get_task(seq)?.ok_or(MirrorQueueError::TaskNotFound(seq))?;

        let dead = DeadMirrorTask {
            task,
            error,
            attempts,
            failed_at: Utc::now(),
        };
        self.dlq
            .insert(seq.to_be_bytes(), serde_json::to_vec(&dead)?)?;
        self.tasks.remove(seq.to_be_bytes())?;

        info!(seq, attempts, "Mirror task moved to DLQ");
        Ok(())
    }

    /// All unacknowledged tasks, in enqueue order. Used for startup
    /// replay after a crash.
    pub fn pending(&self) -> Result<Vec<(u64, MirrorTask)>> {
        let mut out = Vec::new();
        for item in self.tasks.iter() {
            let (key, value) = item?;
            let seq = u64::from_be_bytes(key.as_ref().try_into().unwrap_or([0u8; 8]));
            out.push((seq, serde_json::from_slice(&value)?));
        }
        Ok(out)
    }

    pub fn list_dlq(&self, limit: usize) -> Result<Vec<(u64, DeadMirrorTask)>> {
        let mut out = Vec::new();
        for item in self.dlq.iter().take(limit) {
            let (key, value) = item?;
            let seq = u64::from_be_bytes(key.as_ref().try_into().unwrap_or([0u8; 8]));
            out.push((seq, serde_json::from_slice(&value)?));
        }
        Ok(out)
    }

    pub fn current_seq(&self) -> u64 {
        self.seq_counter.load(Ordering::SeqCst)
    }

    pub fn flush(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }
}
