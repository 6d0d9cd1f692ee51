//! Best-effort per-user stats aggregation.
//!
//! Every lifecycle transition adjusts the denormalized counters in an
//! independent write. Failures are logged and swallowed; the counters
//! are a product feature, not a correctness invariant.

use std::sync::Arc;

use tracing::warn;

use crate::model::{GenerationStatus, StatsCounter};
use crate::store::DocStore;

pub struct StatsAggregator {
    store: Arc<DocStore>,
}

impl StatsAggregator {
    pub fn new(store: Arc<DocStore>) -> Self {
        Self { store }
    }

    pub fn on_created(&self, uid: &str, generation_type: &str) {
        self.apply(uid, |c| {
            c.total += 1;
            c.bump_status(GenerationStatus::Generating.as_str(), 1);
            c.bump_type(generation_type, 1);
        });
    }

    pub fn on_transition(&self, uid: &str, from: GenerationStatus, to: GenerationStatus) {
        self.apply(uid, |c| {
            c.bump_status(from.as_str(), -1);
            c.bump_status(to.as_str(), 1);
        });
    }

    pub fn on_deleted(&self, uid: &str, status: GenerationStatus, generation_type: &str) {
        self.apply(uid, |c| {
            c.total = (c.total - 1).max(0);
            c.bump_status(status.as_str(), -1);
            c.bump_type(generation_type, -1);
        });
    }

    pub fn get(&self, uid: &str) -> StatsCounter {
        self.store.get_stats(uid).unwrap_or_else(|err| {
            warn!(uid, error = %err, "Failed to read stats, returning empty");
            StatsCounter::default()
        })
    }

    fn apply(&self, uid: &str, f: impl FnOnce(&mut StatsCounter)) {
        if let Err(err) = self.store.update_stats(uid, f) {
            warn!(uid, error = %err, "Stats update failed, continuing");
        }
    }
}
