use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    Debit,
    Grant,
}

/// Entries only exist in the store once confirmed; the status field is
/// kept on the document so exports stay self-describing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    Confirmed,
}

/// Immutable record of a single balance-affecting transaction, keyed by
/// `(uid, idempotency key)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_type: EntryType,
    pub amount: i64,
    pub reason: String,
    pub status: EntryStatus,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn confirmed(
        entry_type: EntryType,
        amount: i64,
        reason: impl Into<String>,
        meta: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            entry_type,
            amount,
            reason: reason.into(),
            status: EntryStatus::Confirmed,
            meta,
            created_at: now,
        }
    }
}

/// Account balance document. Only ever written in the same atomic batch
/// as a ledger entry (or re-asserted on the already-applied grant path).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    pub uid: String,
    pub credit_balance: i64,
    pub plan_code: String,
}

impl UserAccount {
    /// Accounts materialize lazily on first ledger touch.
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            credit_balance: 0,
            plan_code: "free".into(),
        }
    }
}
