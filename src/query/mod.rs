//! Cursor pagination over the record store.
//!
//! The primary path pushes one equality filter down to a composite
//! index and post-filters the rest in memory over an over-fetched
//! window. When the store reports a missing composite index (a typed
//! condition, not a sniffed message), the engine degrades to a bounded
//! scan: pages ordered by the sort field only, every filter applied in
//! memory, accumulating across a capped number of extra fetches.
//!
//! Invariant either way: `next_cursor` is derived from the last item
//! actually returned to the caller after all in-memory filtering, never
//! from the raw tail of an unfiltered page. A cursor taken from the raw
//! tail would skip or duplicate items whenever filtering trims a page.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{GenerationRecord, GenerationStatus, Visibility};
use crate::observability::Metrics;
use crate::store::{DocStore, EqualityFilter, QueryPlan, StartAfter, StoreError};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("invalid query: {0}")]
    Validation(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, QueryError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    CreatedAt,
    UpdatedAt,
}

impl SortBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortBy::CreatedAt => "created_at",
            SortBy::UpdatedAt => "updated_at",
        }
    }

    fn millis_of(&self, record: &GenerationRecord) -> i64 {
        match self {
            SortBy::CreatedAt => record.created_at.timestamp_millis(),
            SortBy::UpdatedAt => record.updated_at.timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// One list request against a user's records.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub limit: usize,
    pub cursor: Option<String>,
    pub status: Option<GenerationStatus>,
    pub generation_type: Option<String>,
    pub visibility: Option<Visibility>,
    /// Case-insensitive substring match on the prompt.
    pub search: Option<String>,
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListPage {
    pub items: Vec<GenerationRecord>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
    /// Count of matching records from the cursor onward; only known when
    /// a scan ran to exhaustion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<usize>,
}

pub struct QueryEngine {
    store: Arc<DocStore>,
    metrics: Arc<Metrics>,
    over_fetch_factor: usize,
    scan_max_iterations: usize,
}

impl QueryEngine {
    pub fn new(
        store: Arc<DocStore>,
        metrics: Arc<Metrics>,
        over_fetch_factor: usize,
        scan_max_iterations: usize,
    ) -> Self {
        Self {
            store,
            metrics,
            over_fetch_factor: over_fetch_factor.max(1),
            scan_max_iterations: scan_max_iterations.max(1),
        }
    }

    pub fn list(&self, uid: &str, query: &ListQuery) -> Result<ListPage> {
        let limit = query.limit.max(1);
        let start_after = query.cursor.as_deref().map(decode_cursor).transpose()?;

        match self.run(uid, query, limit, start_after.clone(), true) {
            Ok(page) => Ok(page),
            Err(QueryError::Store(StoreError::MissingIndex {
                filter_field,
                sort_field,
            })) => {
                warn!(
                    uid,
                    filter_field,
                    sort_field,
                    "No composite index, degrading to in-memory scan"
                );
                self.metrics.fallback_scan();
                self.run(uid, query, limit, start_after, false)
            }
            Err(err) => Err(err),
        }
    }

    /// Shared accumulation loop. `indexed` selects whether one equality
    /// filter is pushed down to the store; every filter is re-checked in
    /// memory regardless, so the pushdown is purely a read reducer.
    fn run(
        &self,
        uid: &str,
        query: &ListQuery,
        limit: usize,
        mut start_after: Option<StartAfter>,
        indexed: bool,
    ) -> Result<ListPage> {
        let equality = if indexed { pushdown_filter(query) } else { None };
        let fetch_limit = (limit * self.over_fetch_factor).max(limit + 1);

        let mut matched: Vec<GenerationRecord> = Vec::new();
        let mut exhausted = false;
        let mut iterations = 0usize;

        while matched.len() <= limit {
            // The iteration cap only binds the degraded scan; the indexed
            // path discards little and terminates on its own.
            if !indexed && iterations >= self.scan_max_iterations {
                break;
            }
            iterations += 1;

            let plan = QueryPlan {
                equality: equality.clone(),
                sort_field: query.sort_by.as_str().to_string(),
                descending: query.sort_order == SortOrder::Desc,
                start_after: start_after.clone(),
                fetch_limit,
            };
            let raw = self.store.query_records(uid, &plan)?;
            let raw_len = raw.len();

            if let Some(last) = raw.last() {
                start_after = Some(StartAfter {
                    sort_millis: query.sort_by.millis_of(last),
                    id: last.id.clone(),
                });
            }

            matched.extend(raw.into_iter().filter(|rec| matches_filters(rec, query)));

            if raw_len < fetch_limit {
                exhausted = true;
                break;
            }
        }

        let total_matched = matched.len();
        let has_more = total_matched > limit || !exhausted;
        matched.truncate(limit);

        // Resume from the last item actually returned. Only when the page
        // is empty (capped scan, nothing matched yet) is the raw scan
        // position safe to hand out: every raw item behind it was checked
        // and rejected, so nothing can be skipped.
        let next_cursor = if has_more {
            matched
                .last()
                .map(|rec| encode_cursor(query.sort_by.millis_of(rec), &rec.id))
                .or_else(|| {
                    start_after
                        .as_ref()
                        .map(|after| encode_cursor(after.sort_millis, &after.id))
                })
        } else {
            None
        };

        debug!(
            uid,
            returned = matched.len(),
            has_more,
            indexed,
            iterations,
            "List page served"
        );

        Ok(ListPage {
            items: matched,
            next_cursor,
            has_more,
            total_count: exhausted.then_some(total_matched),
        })
    }
}

/// Pick the most selective equality filter to push down to an index.
fn pushdown_filter(query: &ListQuery) -> Option<EqualityFilter> {
    if let Some(gen_type) = &query.generation_type {
        return Some(EqualityFilter {
            field: "generation_type".into(),
            value: gen_type.clone(),
        });
    }
    if let Some(status) = query.status {
        return Some(EqualityFilter {
            field: "status".into(),
            value: status.as_str().into(),
        });
    }
    if let Some(visibility) = query.visibility {
        return Some(EqualityFilter {
            field: "visibility".into(),
            value: match visibility {
                Visibility::Public => "public".into(),
                Visibility::Private => "private".into(),
            },
        });
    }
    None
}

fn matches_filters(record: &GenerationRecord, query: &ListQuery) -> bool {
    if record.is_deleted {
        return false;
    }
    if let Some(status) = query.status {
        if record.status != status {
            return false;
        }
    }
    if let Some(gen_type) = &query.generation_type {
        if &record.generation_type != gen_type {
            return false;
        }
    }
    if let Some(visibility) = query.visibility {
        if record.visibility != visibility {
            return false;
        }
    }
    if let Some(search) = &query.search {
        if !record
            .prompt
            .to_lowercase()
            .contains(&search.to_lowercase())
        {
            return false;
        }
    }
    true
}

fn encode_cursor(sort_millis: i64, id: &str) -> String {
    format!("{:020}:{id}", sort_millis.max(0))
}

fn decode_cursor(cursor: &str) -> Result<StartAfter> {
    let (millis, id) = cursor
        .split_once(':')
        .ok_or_else(|| QueryError::InvalidCursor(cursor.to_string()))?;
    let sort_millis: i64 = millis
        .parse()
        .map_err(|_| QueryError::InvalidCursor(cursor.to_string()))?;
    if id.is_empty() {
        return Err(QueryError::InvalidCursor(cursor.to_string()));
    }
    Ok(StartAfter {
        sort_millis,
        id: id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Visibility;
    use crate::store::IndexRegistry;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn engine(composites: Vec<(&str, &str)>) -> (QueryEngine, Arc<DocStore>, TempDir) {
        let tmp = TempDir::new().unwrap();
        let registry = IndexRegistry::new(
            composites
                .into_iter()
                .map(|(f, s)| (f.to_string(), s.to_string()))
                .collect(),
        );
        let store = Arc::new(DocStore::open(tmp.path().join("docs"), registry).unwrap());
        let engine = QueryEngine::new(store.clone(), Arc::new(Metrics::new()), 3, 8);
        (engine, store, tmp)
    }

    fn seed(store: &DocStore, uid: &str, count: usize) {
        for i in 0..count {
            let ts = Utc.timestamp_millis_opt(1_000 + i as i64 * 1_000).unwrap();
            let gen_type = if i % 3 == 0 { "text-to-image" } else { "text-to-video" };
            let record = GenerationRecord {
                id: format!("g{:03}", i),
                uid: uid.to_string(),
                prompt: format!("prompt number {i}"),
                model: "m".into(),
                generation_type: gen_type.to_string(),
                status: GenerationStatus::Generating,
                is_deleted: i % 7 == 0,
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
            };
            store.put_record(None, &record).unwrap();
        }
    }

    fn page_through(engine: &QueryEngine, uid: &str, base: &ListQuery) -> Vec<String> {
        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let mut q = base.clone();
            q.cursor = cursor;
            let page = engine.list(uid, &q).unwrap();
            seen.extend(page.items.iter().map(|r| r.id.clone()));
            if !page.has_more {
                break;
            }
            cursor = page.next_cursor;
            assert!(cursor.is_some(), "has_more implies a cursor");
        }
        seen
    }

    #[test]
    fn paging_is_exhaustive_without_duplicates_indexed() {
        let (engine, store, _tmp) = engine(vec![("generation_type", "created_at")]);
        seed(&store, "u1", 30);

        let q = ListQuery {
            limit: 4,
            generation_type: Some("text-to-video".into()),
            sort_order: SortOrder::Asc,
            ..Default::default()
        };
        let seen = page_through(&engine, "u1", &q);

        let expected: Vec<String> = (0..30)
            .filter(|i| i % 3 != 0 && i % 7 != 0)
            .map(|i| format!("g{:03}", i))
            .collect();
        assert_eq!(seen, expected);
        assert_eq!(seen.iter().collect::<BTreeSet<_>>().len(), seen.len());
    }

    #[test]
    fn paging_is_exhaustive_without_duplicates_fallback() {
        // No composite index declared at all: every filtered list goes
        // through the scan path.
        let (engine, store, _tmp) = engine(vec![]);
        seed(&store, "u1", 30);

        let q = ListQuery {
            limit: 4,
            generation_type: Some("text-to-video".into()),
            sort_order: SortOrder::Asc,
            ..Default::default()
        };
        let seen = page_through(&engine, "u1", &q);

        let expected: Vec<String> = (0..30)
            .filter(|i| i % 3 != 0 && i % 7 != 0)
            .map(|i| format!("g{:03}", i))
            .collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn indexed_and_fallback_agree() {
        let (indexed, store_a, _tmp_a) = engine(vec![("generation_type", "created_at")]);
        let (fallback, store_b, _tmp_b) = engine(vec![]);
        seed(&store_a, "u1", 25);
        seed(&store_b, "u1", 25);

        let q = ListQuery {
            limit: 6,
            generation_type: Some("text-to-image".into()),
            ..Default::default()
        };
        assert_eq!(page_through(&indexed, "u1", &q), page_through(&fallback, "u1", &q));
    }

    #[test]
    fn next_cursor_comes_from_last_returned_item() {
        let (engine, store, _tmp) = engine(vec![]);
        seed(&store, "u1", 15);

        let q = ListQuery {
            limit: 3,
            generation_type: Some("text-to-video".into()),
            sort_order: SortOrder::Asc,
            ..Default::default()
        };
        let page = engine.list("u1", &q).unwrap();
        let last = page.items.last().unwrap();
        let cursor = page.next_cursor.clone().unwrap();
        assert!(cursor.ends_with(&last.id));

        // The next page starts strictly after that item.
        let mut q2 = q.clone();
        q2.cursor = Some(cursor);
        let page2 = engine.list("u1", &q2).unwrap();
        assert!(page2.items.iter().all(|r| r.id > last.id));
    }

    #[test]
    fn soft_deleted_records_never_surface() {
        let (engine, store, _tmp) = engine(vec![]);
        seed(&store, "u1", 30);

        let q = ListQuery {
            limit: 50,
            sort_order: SortOrder::Asc,
            ..Default::default()
        };
        let page = engine.list("u1", &q).unwrap();
        assert!(page.items.iter().all(|r| !r.is_deleted));
        assert!(!page.items.iter().any(|r| r.id == "g000"));
    }

    #[test]
    fn scan_cap_bounds_reads_for_sparse_filters() {
        let (engine_capped, store, _tmp) = {
            let tmp = TempDir::new().unwrap();
            let store =
                Arc::new(DocStore::open(tmp.path().join("docs"), IndexRegistry::default()).unwrap());
            (
                QueryEngine::new(store.clone(), Arc::new(Metrics::new()), 1, 2),
                store,
                tmp,
            )
        };
        seed(&store, "u1", 40);

        // A search that matches nothing: the capped scan must stop and
        // report that more raw data remains.
        let q = ListQuery {
            limit: 5,
            search: Some("no such prompt text".into()),
            sort_order: SortOrder::Asc,
            ..Default::default()
        };
        let page = engine_capped.list("u1", &q).unwrap();
        assert!(page.items.is_empty());
        assert!(page.has_more);
        assert_eq!(page.total_count, None);
        // An empty capped page still advances, so callers can keep going.
        let cursor = page.next_cursor.expect("empty capped page must advance");

        let mut q2 = q.clone();
        q2.cursor = Some(cursor);
        let page2 = engine_capped.list("u1", &q2).unwrap();
        assert!(page2.items.is_empty());
    }

    #[test]
    fn exhausted_scan_reports_total_count() {
        let (engine, store, _tmp) = engine(vec![]);
        seed(&store, "u1", 10);

        let q = ListQuery {
            limit: 50,
            sort_order: SortOrder::Asc,
            ..Default::default()
        };
        let page = engine.list("u1", &q).unwrap();
        assert!(!page.has_more);
        assert_eq!(page.total_count, Some(page.items.len()));
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn search_filters_in_memory() {
        let (engine, store, _tmp) = engine(vec![]);
        seed(&store, "u1", 12);

        let q = ListQuery {
            limit: 10,
            search: Some("NUMBER 1".into()),
            sort_order: SortOrder::Asc,
            ..Default::default()
        };
        let page = engine.list("u1", &q).unwrap();
        assert!(!page.items.is_empty());
        assert!(page
            .items
            .iter()
            .all(|r| r.prompt.contains("number 1")));
    }

    #[test]
    fn malformed_cursor_is_rejected() {
        let (engine, _store, _tmp) = engine(vec![]);
        let q = ListQuery {
            limit: 5,
            cursor: Some("not-a-cursor".into()),
            ..Default::default()
        };
        assert!(matches!(
            engine.list("u1", &q),
            Err(QueryError::InvalidCursor(_))
        ));
    }
}
