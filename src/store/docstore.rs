use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::ops::Bound;
use std::path::Path;
use std::sync::Mutex;

use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::{debug, info};

use crate::model::{GenerationRecord, LedgerEntry, MirrorRecord, StatsCounter, UserAccount};

use super::error::{Result, StoreError};
use super::index::{field_value, IndexRegistry, QueryPlan, SORT_FIELDS};
use super::keys::{
    encode_account_key, encode_index_key, encode_index_prefix, encode_ledger_key,
    encode_mirror_key, encode_order_key, encode_order_prefix, encode_record_key,
    encode_stats_key, prefix_successor, sort_millis,
};

const LOCK_SHARDS: usize = 64;

/// Fjall-backed JSON document store for the lifecycle engine.
///
/// Single-partition "transactions" are provided by sharded per-user
/// mutexes around read-modify-write sequences, with the actual writes
/// going through atomic cross-partition batches. That is the embedded
/// equivalent of the hosted store's optimistic transaction: within one
/// process, a lock holder can never lose a race, so no retry loop is
/// needed on top of fjall's own write path.
pub struct DocStore {
    keyspace: Keyspace,
    records: PartitionHandle,
    order: PartitionHandle,
    index: PartitionHandle,
    accounts: PartitionHandle,
    ledger: PartitionHandle,
    mirror: PartitionHandle,
    stats: PartitionHandle,
    indexes: IndexRegistry,
    locks: Vec<Mutex<()>>,
}

impl DocStore {
    pub fn open<P: AsRef<Path>>(path: P, indexes: IndexRegistry) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Opening document store");

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;

        let records = keyspace.open_partition("records", PartitionCreateOptions::default())?;
        let order = keyspace.open_partition("order", PartitionCreateOptions::default())?;
        let index = keyspace.open_partition("index", PartitionCreateOptions::default())?;
        let accounts = keyspace.open_partition("accounts", PartitionCreateOptions::default())?;
        let ledger = keyspace.open_partition("ledger", PartitionCreateOptions::default())?;
        let mirror = keyspace.open_partition("mirror", PartitionCreateOptions::default())?;
        let stats = keyspace.open_partition("stats", PartitionCreateOptions::default())?;

        info!(
            composites = indexes.composites().len(),
            "Document store opened"
        );

        Ok(Self {
            keyspace,
            records,
            order,
            index,
            accounts,
            ledger,
            mirror,
            stats,
            indexes,
            locks: (0..LOCK_SHARDS).map(|_| Mutex::new(())).collect(),
        })
    }

    /// Serialize all read-modify-write sequences for one uid. Shard
    /// collisions only cost contention, never correctness.
    pub fn with_uid_lock<T>(&self, uid: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let mut hasher = DefaultHasher::new();
        uid.hash(&mut hasher);
        let shard = (hasher.finish() as usize) % LOCK_SHARDS;
        let _guard = self.locks[shard].lock().expect("uid lock poisoned");
        f()
    }

    // ------------------------------------------------------------------
    // Generation records
    // ------------------------------------------------------------------

    pub fn get_record(&self, uid: &str, id: &str) -> Result<Option<GenerationRecord>> {
        match self.records.get(encode_record_key(uid, id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Write a record and keep its order/index entries in step, all in
    /// one atomic batch. `old` must be the previously stored version (or
    /// `None` on create) so stale index keys can be dropped.
    pub fn put_record(
        &self,
        old: Option<&GenerationRecord>,
        record: &GenerationRecord,
    ) -> Result<()> {
        let value = serde_json::to_vec(record)?;
        let mut batch = self.keyspace.batch();
        batch.insert(&self.records, encode_record_key(&record.uid, &record.id), value);

        for sort_field in SORT_FIELDS {
            let new_millis = record_sort_millis(record, sort_field);
            if let Some(old) = old {
                let old_millis = record_sort_millis(old, sort_field);
                if old_millis != new_millis {
                    batch.remove(
                        &self.order,
                        encode_order_key(&record.uid, sort_field, old_millis, &record.id),
                    );
                }
            }
            batch.insert(
                &self.order,
                encode_order_key(&record.uid, sort_field, new_millis, &record.id),
                record.id.as_bytes(),
            );
        }

        for (field, sort_field) in self.indexes.composites() {
            let new_value = field_value(record, field);
            let new_millis = record_sort_millis(record, sort_field);
            if let Some(old) = old {
                let old_value = field_value(old, field);
                let old_millis = record_sort_millis(old, sort_field);
                if let Some(old_value) = old_value {
                    if Some(&old_value) != new_value.as_ref() || old_millis != new_millis {
                        batch.remove(
                            &self.index,
                            encode_index_key(
                                &record.uid, field, &old_value, sort_field, old_millis,
                                &record.id,
                            ),
                        );
                    }
                }
            }
            if let Some(new_value) = new_value {
                batch.insert(
                    &self.index,
                    encode_index_key(
                        &record.uid, field, &new_value, sort_field, new_millis, &record.id,
                    ),
                    record.id.as_bytes(),
                );
            }
        }

        batch.commit()?;
        debug!(uid = %record.uid, id = %record.id, status = record.status.as_str(), "Record written");
        Ok(())
    }

    /// Ordered, optionally equality-filtered page of records.
    ///
    /// With an equality filter, the `(filter, sort)` pair must be covered
    /// by a declared composite index; otherwise this returns
    /// [`StoreError::MissingIndex`] without touching any partition.
    pub fn query_records(&self, uid: &str, plan: &QueryPlan) -> Result<Vec<GenerationRecord>> {
        let prefix = match &plan.equality {
            Some(eq) => {
                if !self.indexes.covers(&eq.field, &plan.sort_field) {
                    return Err(StoreError::MissingIndex {
                        filter_field: eq.field.clone(),
                        sort_field: plan.sort_field.clone(),
                    });
                }
                encode_index_prefix(uid, &eq.field, &eq.value, &plan.sort_field)
            }
            None => encode_order_prefix(uid, &plan.sort_field),
        };

        let cursor_key = plan.start_after.as_ref().map(|after| {
            let mut key = prefix.clone();
            key.extend_from_slice(
                format!("{:020}:{}", after.sort_millis.max(0), after.id).as_bytes(),
            );
            key
        });

        let prefix_end = prefix_successor(&prefix);
        let (low, high) = if plan.descending {
            // Strictly below the cursor, newest first.
            (
                Bound::Included(prefix.clone()),
                match cursor_key {
                    Some(key) => Bound::Excluded(key),
                    None => Bound::Excluded(prefix_end),
                },
            )
        } else {
            (
                match cursor_key {
                    Some(key) => Bound::Excluded(key),
                    None => Bound::Included(prefix.clone()),
                },
                Bound::Excluded(prefix_end),
            )
        };

        let partition = if plan.equality.is_some() {
            &self.index
        } else {
            &self.order
        };

        let mut ids = Vec::with_capacity(plan.fetch_limit);
        let range = partition.range((low, high));
        if plan.descending {
            for item in range.rev().take(plan.fetch_limit) {
                let (_, value) = item?;
                ids.push(String::from_utf8_lossy(&value).to_string());
            }
        } else {
            for item in range.take(plan.fetch_limit) {
                let (_, value) = item?;
                ids.push(String::from_utf8_lossy(&value).to_string());
            }
        }

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.get_record(uid, &id)? {
                out.push(record);
            }
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Ledger + accounts
    // ------------------------------------------------------------------

    pub fn get_ledger_entry(&self, uid: &str, idempotency_key: &str) -> Result<Option<LedgerEntry>> {
        match self.ledger.get(encode_ledger_key(uid, idempotency_key))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    pub fn get_account(&self, uid: &str) -> Result<Option<UserAccount>> {
        match self.accounts.get(encode_account_key(uid))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Entry + balance land in one atomic batch; there is no state in
    /// which one is visible without the other.
    pub fn commit_ledger(
        &self,
        uid: &str,
        idempotency_key: &str,
        entry: &LedgerEntry,
        account: &UserAccount,
    ) -> Result<()> {
        let mut batch = self.keyspace.batch();
        batch.insert(
            &self.ledger,
            encode_ledger_key(uid, idempotency_key),
            serde_json::to_vec(entry)?,
        );
        batch.insert(
            &self.accounts,
            encode_account_key(uid),
            serde_json::to_vec(account)?,
        );
        batch.commit()?;
        debug!(uid, idempotency_key, amount = entry.amount, "Ledger entry committed");
        Ok(())
    }

    /// Used by the already-applied grant path to re-assert plan/balance
    /// without creating a second entry.
    pub fn put_account(&self, account: &UserAccount) -> Result<()> {
        self.accounts
            .insert(encode_account_key(&account.uid), serde_json::to_vec(account)?)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Public mirror
    // ------------------------------------------------------------------

    pub fn get_mirror(&self, id: &str) -> Result<Option<MirrorRecord>> {
        match self.mirror.get(encode_mirror_key(id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Full merge-set: overwriting with the projection of the current
    /// authoritative record is what makes re-application idempotent.
    pub fn put_mirror(&self, record: &MirrorRecord) -> Result<()> {
        self.mirror
            .insert(encode_mirror_key(&record.id), serde_json::to_vec(record)?)?;
        Ok(())
    }

    /// Delete-if-exists; removing an absent projection is a no-op.
    pub fn remove_mirror(&self, id: &str) -> Result<()> {
        self.mirror.remove(encode_mirror_key(id))?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Stats
    // ------------------------------------------------------------------

    pub fn get_stats(&self, uid: &str) -> Result<StatsCounter> {
        match self.stats.get(encode_stats_key(uid))? {
            Some(value) => Ok(serde_json::from_slice(&value)?),
            None => Ok(StatsCounter::default()),
        }
    }

    /// Read-modify-write under the uid lock; callers treat failures as
    /// best-effort.
    pub fn update_stats(&self, uid: &str, f: impl FnOnce(&mut StatsCounter)) -> Result<()> {
        self.with_uid_lock(uid, || {
            let mut counter = self.get_stats(uid)?;
            f(&mut counter);
            self.stats
                .insert(encode_stats_key(uid), serde_json::to_vec(&counter)?)?;
            Ok(())
        })
    }

    /// Flush all pending writes to disk.
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }
}

fn record_sort_millis(record: &GenerationRecord, sort_field: &str) -> i64 {
    match sort_field {
        "updated_at" => sort_millis(record.updated_at),
        // created_at is the default sort axis; unknown fields cannot get
        // here because SORT_FIELDS is closed.
        _ => sort_millis(record.created_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GenerationStatus, Visibility};
    use crate::store::index::{EqualityFilter, StartAfter};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn test_store() -> (DocStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let registry = IndexRegistry::new(vec![(
            "generation_type".to_string(),
            "created_at".to_string(),
        )]);
        let store = DocStore::open(temp_dir.path().join("docs"), registry).unwrap();
        (store, temp_dir)
    }

    fn record(uid: &str, id: &str, gen_type: &str, millis: i64) -> GenerationRecord {
        let ts = Utc.timestamp_millis_opt(millis).unwrap();
        GenerationRecord {
            id: id.to_string(),
            uid: uid.to_string(),
            prompt: "p".into(),
            model: "m".into(),
            generation_type: gen_type.to_string(),
            status: GenerationStatus::Generating,
            is_deleted: false,
            is_public: false,
            explicit_public: false,
            visibility: Visibility::Private,
            images: Vec::new(),
            videos: Vec::new(),
            audios: Vec::new(),
            input_images: Vec::new(),
            input_videos: Vec::new(),
            provider: None,
            provider_task_id: None,
            error: None,
            created_at: ts,
            updated_at: ts,
        }
    }

    fn plan(sort_field: &str, descending: bool, fetch_limit: usize) -> QueryPlan {
        QueryPlan {
            equality: None,
            sort_field: sort_field.to_string(),
            descending,
            start_after: None,
            fetch_limit,
        }
    }

    #[test]
    fn put_and_get_round_trip() {
        let (store, _tmp) = test_store();
        let rec = record("u1", "g1", "text-to-image", 1_000);
        store.put_record(None, &rec).unwrap();

        let got = store.get_record("u1", "g1").unwrap().unwrap();
        assert_eq!(got.id, "g1");
        assert!(store.get_record("u2", "g1").unwrap().is_none());
    }

    #[test]
    fn order_scan_ascending_and_descending() {
        let (store, _tmp) = test_store();
        for (id, millis) in [("g1", 1_000), ("g2", 2_000), ("g3", 3_000)] {
            store
                .put_record(None, &record("u1", id, "text-to-image", millis))
                .unwrap();
        }

        let asc = store.query_records("u1", &plan("created_at", false, 10)).unwrap();
        assert_eq!(
            asc.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            ["g1", "g2", "g3"]
        );

        let desc = store.query_records("u1", &plan("created_at", true, 10)).unwrap();
        assert_eq!(
            desc.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            ["g3", "g2", "g1"]
        );
    }

    #[test]
    fn cursor_starts_strictly_after() {
        let (store, _tmp) = test_store();
        for (id, millis) in [("g1", 1_000), ("g2", 2_000), ("g3", 3_000)] {
            store
                .put_record(None, &record("u1", id, "text-to-image", millis))
                .unwrap();
        }

        let mut p = plan("created_at", false, 10);
        p.start_after = Some(StartAfter {
            sort_millis: 2_000,
            id: "g2".into(),
        });
        let page = store.query_records("u1", &p).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "g3");

        let mut p = plan("created_at", true, 10);
        p.start_after = Some(StartAfter {
            sort_millis: 2_000,
            id: "g2".into(),
        });
        let page = store.query_records("u1", &p).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "g1");
    }

    #[test]
    fn covered_equality_filter_uses_index() {
        let (store, _tmp) = test_store();
        store
            .put_record(None, &record("u1", "g1", "text-to-image", 1_000))
            .unwrap();
        store
            .put_record(None, &record("u1", "g2", "text-to-video", 2_000))
            .unwrap();

        let mut p = plan("created_at", false, 10);
        p.equality = Some(EqualityFilter {
            field: "generation_type".into(),
            value: "text-to-video".into(),
        });
        let page = store.query_records("u1", &p).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "g2");
    }

    #[test]
    fn uncovered_combination_is_a_typed_error() {
        let (store, _tmp) = test_store();
        let mut p = plan("created_at", false, 10);
        p.equality = Some(EqualityFilter {
            field: "status".into(),
            value: "generating".into(),
        });
        let err = store.query_records("u1", &p).unwrap_err();
        assert!(matches!(err, StoreError::MissingIndex { .. }));
    }

    #[test]
    fn index_entries_follow_field_changes() {
        let (store, _tmp) = test_store();
        let old = record("u1", "g1", "text-to-image", 1_000);
        store.put_record(None, &old).unwrap();

        let mut new = old.clone();
        new.generation_type = "text-to-video".into();
        store.put_record(Some(&old), &new).unwrap();

        let mut p = plan("created_at", false, 10);
        p.equality = Some(EqualityFilter {
            field: "generation_type".into(),
            value: "text-to-image".into(),
        });
        assert!(store.query_records("u1", &p).unwrap().is_empty());

        p.equality = Some(EqualityFilter {
            field: "generation_type".into(),
            value: "text-to-video".into(),
        });
        assert_eq!(store.query_records("u1", &p).unwrap().len(), 1);
    }

    #[test]
    fn updated_at_order_entry_moves_on_touch() {
        let (store, _tmp) = test_store();
        let old = record("u1", "g1", "text-to-image", 1_000);
        store.put_record(None, &old).unwrap();
        store
            .put_record(None, &record("u1", "g2", "text-to-image", 2_000))
            .unwrap();

        let mut new = old.clone();
        new.updated_at = Utc.timestamp_millis_opt(5_000).unwrap();
        store.put_record(Some(&old), &new).unwrap();

        let page = store.query_records("u1", &plan("updated_at", false, 10)).unwrap();
        assert_eq!(
            page.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            ["g2", "g1"]
        );
        // No stale duplicate left behind under the old timestamp.
        assert_eq!(page.len(), 2);
    }

    #[test]
    fn mirror_remove_is_delete_if_exists() {
        let (store, _tmp) = test_store();
        store.remove_mirror("never-written").unwrap();

        let rec = record("u1", "g1", "text-to-image", 1_000);
        store.put_mirror(&MirrorRecord::project(&rec)).unwrap();
        assert!(store.get_mirror("g1").unwrap().is_some());
        store.remove_mirror("g1").unwrap();
        store.remove_mirror("g1").unwrap();
        assert!(store.get_mirror("g1").unwrap().is_none());
    }

    #[test]
    fn ledger_commit_is_atomic_pairing() {
        let (store, _tmp) = test_store();
        let entry = LedgerEntry::confirmed(
            crate::model::EntryType::Debit,
            10,
            "generation",
            serde_json::Value::Null,
            Utc::now(),
        );
        let mut account = UserAccount::new("u1");
        account.credit_balance = 90;
        store.commit_ledger("u1", "r1", &entry, &account).unwrap();

        assert!(store.get_ledger_entry("u1", "r1").unwrap().is_some());
        assert_eq!(store.get_account("u1").unwrap().unwrap().credit_balance, 90);
        assert!(store.get_ledger_entry("u1", "r2").unwrap().is_none());
    }

    #[test]
    fn stats_update_round_trip() {
        let (store, _tmp) = test_store();
        store
            .update_stats("u1", |c| {
                c.total += 1;
                c.bump_status("generating", 1);
                c.bump_type("text-to-image", 1);
            })
            .unwrap();

        let stats = store.get_stats("u1").unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.by_status["generating"], 1);
    }
}
