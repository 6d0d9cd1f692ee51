//! Credit ledger: append-only transaction log plus a mutable balance,
//! with idempotent debit/grant operations.
//!
//! Both operations run under the store's per-user serialization and
//! commit the entry + balance in one atomic batch, so at most one
//! confirmed entry can ever exist per `(uid, idempotency key)` — even
//! under concurrent duplicate invocations such as retried provider
//! callbacks.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info};

use crate::model::{EntryStatus, EntryType, LedgerEntry, UserAccount};
use crate::observability::Metrics;
use crate::store::{DocStore, StoreError};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid ledger request: {0}")]
    Validation(String),

    /// Commit failure is fatal to the caller; because entry and balance
    /// share a batch, no partial mutation can have happened.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Outcome of an idempotent ledger operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// The entry was created and the balance mutated.
    Written,
    /// A confirmed entry already existed for this key; no-op.
    Skipped,
}

pub struct CreditLedger {
    store: Arc<DocStore>,
    metrics: Arc<Metrics>,
}

impl CreditLedger {
    pub fn new(store: Arc<DocStore>, metrics: Arc<Metrics>) -> Self {
        Self { store, metrics }
    }

    /// Debit `amount` credits exactly once per `(uid, idempotency_key)`.
    pub fn debit_if_absent(
        &self,
        uid: &str,
        idempotency_key: &str,
        amount: i64,
        reason: &str,
        meta: serde_json::Value,
    ) -> Result<ApplyOutcome> {
        if amount <= 0 {
            return Err(LedgerError::Validation(format!(
                "debit amount must be positive, got {amount}"
            )));
        }
        validate_key(idempotency_key)?;

        let outcome = self.store.with_uid_lock(uid, || {
            if let Some(existing) = self.store.get_ledger_entry(uid, idempotency_key)? {
                if existing.entry_type == EntryType::Debit
                    && existing.status == EntryStatus::Confirmed
                {
                    debug!(uid, idempotency_key, "Debit already applied, skipping");
                    return Ok(ApplyOutcome::Skipped);
                }
            }

            let mut account = self
                .store
                .get_account(uid)?
                .unwrap_or_else(|| UserAccount::new(uid));
            account.credit_balance -= amount;

            let entry =
                LedgerEntry::confirmed(EntryType::Debit, amount, reason, meta, Utc::now());
            self.store.commit_ledger(uid, idempotency_key, &entry, &account)?;

            info!(uid, idempotency_key, amount, balance = account.credit_balance, "Debit written");
            Ok(ApplyOutcome::Written)
        })?;

        self.record(outcome);
        Ok(outcome)
    }

    /// Grant `credits` and switch plan exactly once per key. The balance
    /// is an absolute set, not a delta: plan switches are state-setting
    /// operations, and the already-applied path re-asserts plan and
    /// balance so repeated requests converge instead of over-granting.
    pub fn grant_and_set_plan_if_absent(
        &self,
        uid: &str,
        idempotency_key: &str,
        credits: i64,
        new_plan: &str,
        reason: &str,
        meta: serde_json::Value,
    ) -> Result<ApplyOutcome> {
        if credits < 0 {
            return Err(LedgerError::Validation(format!(
                "grant credits must be non-negative, got {credits}"
            )));
        }
        if new_plan.is_empty() {
            return Err(LedgerError::Validation("plan code must not be empty".into()));
        }
        validate_key(idempotency_key)?;

        let outcome = self.store.with_uid_lock(uid, || {
            let mut account = self
                .store
                .get_account(uid)?
                .unwrap_or_else(|| UserAccount::new(uid));

            if let Some(existing) = self.store.get_ledger_entry(uid, idempotency_key)? {
                if existing.entry_type == EntryType::Grant
                    && existing.status == EntryStatus::Confirmed
                {
                    account.credit_balance = credits;
                    account.plan_code = new_plan.to_string();
                    self.store.put_account(&account)?;
                    debug!(uid, idempotency_key, "Grant already applied, re-asserted plan");
                    return Ok(ApplyOutcome::Skipped);
                }
            }

            account.credit_balance = credits;
            account.plan_code = new_plan.to_string();

            let entry =
                LedgerEntry::confirmed(EntryType::Grant, credits, reason, meta, Utc::now());
            self.store.commit_ledger(uid, idempotency_key, &entry, &account)?;

            info!(uid, idempotency_key, credits, plan = new_plan, "Grant written");
            Ok(ApplyOutcome::Written)
        })?;

        self.record(outcome);
        Ok(outcome)
    }

    pub fn balance(&self, uid: &str) -> Result<i64> {
        Ok(self
            .store
            .get_account(uid)?
            .map(|a| a.credit_balance)
            .unwrap_or(0))
    }

    fn record(&self, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Written => self.metrics.ledger_written(),
            ApplyOutcome::Skipped => self.metrics.ledger_skipped(),
        }
    }
}

fn validate_key(idempotency_key: &str) -> Result<()> {
    if idempotency_key.is_empty() {
        return Err(LedgerError::Validation("idempotency key must not be empty".into()));
    }
    Ok(())
}
