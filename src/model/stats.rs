use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-user denormalized counters, updated best-effort in a write that is
/// independent of the record write. Not a correctness invariant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsCounter {
    pub total: i64,
    #[serde(default)]
    pub by_status: BTreeMap<String, i64>,
    #[serde(default)]
    pub by_type: BTreeMap<String, i64>,
}

impl StatsCounter {
    pub fn bump_status(&mut self, status: &str, delta: i64) {
        bump(&mut self.by_status, status, delta);
    }

    pub fn bump_type(&mut self, generation_type: &str, delta: i64) {
        bump(&mut self.by_type, generation_type, delta);
    }
}

// Counters are best-effort and may drift under lost writes; clamping at
// zero keeps drift from ever showing negative totals.
fn bump(map: &mut BTreeMap<String, i64>, key: &str, delta: i64) {
    let slot = map.entry(key.to_string()).or_insert(0);
    *slot = (*slot + delta).max(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_clamp_at_zero() {
        let mut stats = StatsCounter::default();
        stats.bump_status("generating", 1);
        stats.bump_status("generating", -1);
        stats.bump_status("generating", -1);
        assert_eq!(stats.by_status["generating"], 0);
    }
}
