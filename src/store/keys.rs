//! Key layout and encoding for the document-store partitions.
//!
//! Partition structure:
//! - `records`:   rec:{uid}:{id} -> GenerationRecord (JSON)
//! - `order`:     ord:{uid}:{sort_field}:{millis:020}:{id} -> id
//! - `index`:     idx:{uid}:{field}:{value}:{sort_field}:{millis:020}:{id} -> id
//! - `accounts`:  acct:{uid} -> UserAccount (JSON)
//! - `ledger`:    led:{uid}:{idempotency_key} -> LedgerEntry (JSON)
//! - `mirror`:    pub:{id} -> MirrorRecord (JSON)
//! - `stats`:     stat:{uid} -> StatsCounter (JSON)
//!
//! Sort values are zero-padded epoch milliseconds, so lexicographic key
//! order equals chronological order; the trailing id is the tiebreaker
//! that makes cursors exact.

use chrono::{DateTime, Utc};

pub fn encode_record_key(uid: &str, id: &str) -> Vec<u8> {
    format!("rec:{uid}:{id}").into_bytes()
}

pub fn encode_account_key(uid: &str) -> Vec<u8> {
    format!("acct:{uid}").into_bytes()
}

pub fn encode_ledger_key(uid: &str, idempotency_key: &str) -> Vec<u8> {
    format!("led:{uid}:{idempotency_key}").into_bytes()
}

pub fn encode_mirror_key(id: &str) -> Vec<u8> {
    format!("pub:{id}").into_bytes()
}

pub fn encode_stats_key(uid: &str) -> Vec<u8> {
    format!("stat:{uid}").into_bytes()
}

pub fn sort_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn encode_millis(millis: i64) -> String {
    // Clamp pre-epoch timestamps into the first slot instead of breaking
    // the lexicographic ordering with a sign character.
    format!("{:020}", millis.max(0))
}

pub fn encode_order_key(uid: &str, sort_field: &str, millis: i64, id: &str) -> Vec<u8> {
    format!("ord:{uid}:{sort_field}:{}:{id}", encode_millis(millis)).into_bytes()
}

pub fn encode_order_prefix(uid: &str, sort_field: &str) -> Vec<u8> {
    format!("ord:{uid}:{sort_field}:").into_bytes()
}

pub fn encode_index_key(
    uid: &str,
    field: &str,
    value: &str,
    sort_field: &str,
    millis: i64,
    id: &str,
) -> Vec<u8> {
    format!(
        "idx:{uid}:{field}:{value}:{sort_field}:{}:{id}",
        encode_millis(millis)
    )
    .into_bytes()
}

pub fn encode_index_prefix(uid: &str, field: &str, value: &str, sort_field: &str) -> Vec<u8> {
    format!("idx:{uid}:{field}:{value}:{sort_field}:").into_bytes()
}

/// Smallest byte string strictly greater than every key with `prefix`.
/// Used as the exclusive upper bound for range scans.
pub fn prefix_successor(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last < 0xFF {
            *last += 1;
            return end;
        }
        end.pop();
    }
    // All-0xFF prefix: no finite successor, scan to the end of the keyspace.
    vec![0xFF; prefix.len() + 1]
}
