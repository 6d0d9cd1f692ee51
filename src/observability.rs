//! Process-local metrics counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics handle for recording counters across the engine.
#[derive(Debug, Default)]
pub struct Metrics {
    generations_started: AtomicU64,
    generations_completed: AtomicU64,
    generations_failed: AtomicU64,
    ledger_written: AtomicU64,
    ledger_skipped: AtomicU64,
    mirror_sync_failures: AtomicU64,
    mirror_tasks_applied: AtomicU64,
    fallback_scans: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation_started(&self) {
        self.generations_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn generation_completed(&self) {
        self.generations_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn generation_failed(&self) {
        self.generations_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ledger_written(&self) {
        self.ledger_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ledger_skipped(&self) {
        self.ledger_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mirror_sync_failure(&self) {
        self.mirror_sync_failures.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "mirror_sync_failures", "Metric incremented");
    }

    pub fn mirror_task_applied(&self) {
        self.mirror_tasks_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fallback_scan(&self) {
        self.fallback_scans.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "fallback_scans", "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            generations_started: self.generations_started.load(Ordering::Relaxed),
            generations_completed: self.generations_completed.load(Ordering::Relaxed),
            generations_failed: self.generations_failed.load(Ordering::Relaxed),
            ledger_written: self.ledger_written.load(Ordering::Relaxed),
            ledger_skipped: self.ledger_skipped.load(Ordering::Relaxed),
            mirror_sync_failures: self.mirror_sync_failures.load(Ordering::Relaxed),
            mirror_tasks_applied: self.mirror_tasks_applied.load(Ordering::Relaxed),
            fallback_scans: self.fallback_scans.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub generations_started: u64,
    pub generations_completed: u64,
    pub generations_failed: u64,
    pub ledger_written: u64,
    pub ledger_skipped: u64,
    pub mirror_sync_failures: u64,
    pub mirror_tasks_applied: u64,
    pub fallback_scans: u64,
}
