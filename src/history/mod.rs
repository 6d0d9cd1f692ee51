//! Generation record store and its state machine.
//!
//! Every mutation here follows the same shape: validate before any
//! write, write the authoritative record (with index maintenance) in one
//! atomic batch, then fan out — stats best-effort, mirror sync
//! best-effort plus a durable queue task, cache invalidation. Only the
//! authoritative write can fail a request.
//!
//! Deletion/unpublish ordering: the inline mirror removal is issued
//! *before* the record write that marks the source deleted or private.
//! The reverse order would leave a window where the public feed serves
//! content the authoritative store already considers gone.

pub mod patch;

pub use patch::{
    apply_media_patch, remove_media_item, CompletionPayload, CreatePayload, FailurePayload,
    MediaPatch, MediaPatchSet, UpdatePatch,
};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::CacheStore;
use crate::mirror::MirrorEngine;
use crate::model::{GenerationRecord, GenerationStatus, MirrorTask, Visibility};
use crate::observability::Metrics;
use crate::query::{ListPage, ListQuery, QueryEngine, QueryError};
use crate::stats::StatsAggregator;
use crate::store::{DocStore, StoreError};

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("illegal status transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: GenerationStatus,
        to: GenerationStatus,
    },

    #[error("generation not found: {0}")]
    NotFound(String),

    #[error("query failed: {0}")]
    Query(#[from] QueryError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, HistoryError>;

pub struct HistoryService {
    store: Arc<DocStore>,
    mirror: Arc<MirrorEngine>,
    stats: Arc<StatsAggregator>,
    query: Arc<QueryEngine>,
    cache: Arc<dyn CacheStore>,
    cache_ttl: Duration,
    metrics: Arc<Metrics>,
}

impl HistoryService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<DocStore>,
        mirror: Arc<MirrorEngine>,
        stats: Arc<StatsAggregator>,
        query: Arc<QueryEngine>,
        cache: Arc<dyn CacheStore>,
        cache_ttl: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            mirror,
            stats,
            query,
            cache,
            cache_ttl,
            metrics,
        }
    }

    /// Seed a new record in `Generating`.
    pub async fn create(&self, uid: &str, payload: CreatePayload) -> Result<GenerationRecord> {
        validate_uid(uid)?;
        if payload.prompt.trim().is_empty() {
            return Err(HistoryError::Validation("prompt must not be empty".into()));
        }
        if payload.generation_type.trim().is_empty() {
            return Err(HistoryError::Validation(
                "generation_type must not be empty".into(),
            ));
        }

        let now = Utc::now();
        let mut record = GenerationRecord {
            id: Uuid::now_v7().to_string(),
            uid: uid.to_string(),
            prompt: payload.prompt,
            model: payload.model,
            generation_type: payload.generation_type,
            status: GenerationStatus::Generating,
            is_deleted: false,
            is_public: false,
            explicit_public: false,
            visibility: Visibility::Private,
            images: Vec::new(),
            videos: Vec::new(),
            audios: Vec::new(),
            input_images: payload.input_images,
            input_videos: payload.input_videos,
            provider: payload.provider,
            provider_task_id: payload.provider_task_id,
            error: None,
            created_at: now,
            updated_at: now,
        };
        record.recompute_visibility(payload.is_public.unwrap_or(false));

        self.store.put_record(None, &record)?;
        self.stats.on_created(uid, &record.generation_type);
        self.mirror.schedule(MirrorTask::upsert(&record)).await;
        self.cache.invalidate(&scope(uid)).await;
        self.metrics.generation_started();

        info!(uid, id = %record.id, generation_type = %record.generation_type, "Generation started");
        Ok(record)
    }

    /// Generating -> Completed. Installs the final media arrays and
    /// recomputes visibility; publication is propagated inline
    /// best-effort plus through the queue backstop.
    pub async fn mark_completed(
        &self,
        uid: &str,
        id: &str,
        payload: CompletionPayload,
    ) -> Result<GenerationRecord> {
        let old = self.require(uid, id)?;
        if !old.status.can_transition_to(GenerationStatus::Completed) {
            return Err(HistoryError::InvalidTransition {
                from: old.status,
                to: GenerationStatus::Completed,
            });
        }

        let mut record = old.clone();
        record.status = GenerationStatus::Completed;
        record.images = payload.images;
        record.videos = payload.videos;
        record.audios = payload.audios;
        if let Some(model) = payload.model {
            record.model = model;
        }
        if payload.provider_task_id.is_some() {
            record.provider_task_id = payload.provider_task_id;
        }
        record.recompute_visibility(payload.is_public.unwrap_or(old.explicit_public));
        record.touch(Utc::now());

        self.commit(&old, &record).await?;
        self.stats
            .on_transition(uid, GenerationStatus::Generating, GenerationStatus::Completed);
        self.metrics.generation_completed();

        info!(uid, id, is_public = record.is_public, "Generation completed");
        Ok(record)
    }

    /// Generating -> Failed. Failed jobs are never published.
    pub async fn mark_failed(
        &self,
        uid: &str,
        id: &str,
        payload: FailurePayload,
    ) -> Result<GenerationRecord> {
        let old = self.require(uid, id)?;
        if !old.status.can_transition_to(GenerationStatus::Failed) {
            return Err(HistoryError::InvalidTransition {
                from: old.status,
                to: GenerationStatus::Failed,
            });
        }

        let mut record = old.clone();
        record.status = GenerationStatus::Failed;
        record.error = Some(payload.error);
        if payload.provider_task_id.is_some() {
            record.provider_task_id = payload.provider_task_id;
        }
        record.explicit_public = false;
        record.is_public = false;
        record.visibility = Visibility::Private;
        record.touch(Utc::now());

        self.commit(&old, &record).await?;
        self.stats
            .on_transition(uid, GenerationStatus::Generating, GenerationStatus::Failed);
        self.metrics.generation_failed();

        info!(uid, id, "Generation failed");
        Ok(record)
    }

    /// General partial update, including single-media patches.
    pub async fn update(&self, uid: &str, id: &str, patch: UpdatePatch) -> Result<GenerationRecord> {
        if patch.is_deleted == Some(false) {
            return Err(HistoryError::Validation(
                "is_deleted cannot be cleared once set".into(),
            ));
        }

        let old = self.require(uid, id)?;
        let mut record = old.clone();

        if let Some(prompt) = patch.prompt {
            record.prompt = prompt;
        }
        if let Some(model) = patch.model {
            record.model = model;
        }
        if let Some(generation_type) = patch.generation_type {
            if generation_type.trim().is_empty() {
                return Err(HistoryError::Validation(
                    "generation_type must not be empty".into(),
                ));
            }
            record.generation_type = generation_type;
        }
        if patch.provider.is_some() {
            record.provider = patch.provider;
        }
        if patch.provider_task_id.is_some() {
            record.provider_task_id = patch.provider_task_id;
        }
        if let Some(media_patch) = &patch.media {
            apply_media_patch(&mut record, media_patch)?;
        }

        record.recompute_visibility(patch.is_public.unwrap_or(old.explicit_public));
        if patch.is_deleted == Some(true) {
            record.is_deleted = true;
        }
        enforce_deleted_invariant(&mut record);
        record.touch(Utc::now());

        self.commit(&old, &record).await?;
        if !old.is_deleted && record.is_deleted {
            self.stats
                .on_deleted(uid, record.status, &record.generation_type);
        }

        debug!(uid, id, is_public = record.is_public, is_deleted = record.is_deleted, "Generation updated");
        Ok(record)
    }

    /// Remove one media item, or soft-delete the whole record.
    ///
    /// With `media_id`, exactly that item is removed; when the last
    /// output item goes, the call escalates to a full soft-delete. The
    /// full soft-delete is monotonic: nothing in this service ever
    /// clears `is_deleted`.
    pub async fn soft_delete(
        &self,
        uid: &str,
        id: &str,
        media_id: Option<&str>,
    ) -> Result<GenerationRecord> {
        let old = self.require(uid, id)?;
        let mut record = old.clone();

        if let Some(media_id) = media_id {
            if !remove_media_item(&mut record, media_id) {
                return Err(HistoryError::NotFound(format!(
                    "media {media_id} on generation {id}"
                )));
            }
            if !record.has_no_output_media() {
                record.recompute_visibility(record.explicit_public);
                enforce_deleted_invariant(&mut record);
                record.touch(Utc::now());

                self.commit(&old, &record).await?;
                debug!(uid, id, media_id, "Media item removed");
                return Ok(record);
            }
            // Every output kind is now empty: fall through to the full
            // soft-delete.
        }

        record.is_deleted = true;
        record.explicit_public = false;
        record.is_public = false;
        record.visibility = Visibility::Private;
        record.touch(Utc::now());

        self.commit(&old, &record).await?;
        self.stats
            .on_deleted(uid, record.status, &record.generation_type);

        info!(uid, id, "Generation soft-deleted");
        Ok(record)
    }

    /// Single-record read through the advisory cache.
    pub async fn get(&self, uid: &str, id: &str) -> Result<Option<GenerationRecord>> {
        let key = format!("{}rec:{id}", scope(uid));
        if let Some(hit) = self.cache.get(&key).await {
            if let Ok(record) = serde_json::from_str(&hit) {
                return Ok(Some(record));
            }
        }

        let record = self.store.get_record(uid, id)?;
        if let Some(record) = &record {
            if let Ok(json) = serde_json::to_string(record) {
                self.cache.set(&key, json, self.cache_ttl).await;
            }
        }
        Ok(record)
    }

    /// List page read through the advisory cache.
    pub async fn list(&self, uid: &str, query: &ListQuery) -> Result<ListPage> {
        let key = format!("{}list:{}", scope(uid), fingerprint(query));
        if let Some(hit) = self.cache.get(&key).await {
            if let Ok(page) = serde_json::from_str(&hit) {
                return Ok(page);
            }
        }

        let page = self.query.list(uid, query)?;
        if let Ok(json) = serde_json::to_string(&page) {
            self.cache.set(&key, json, self.cache_ttl).await;
        }
        Ok(page)
    }

    fn require(&self, uid: &str, id: &str) -> Result<GenerationRecord> {
        self.store
            .get_record(uid, id)?
            .ok_or_else(|| HistoryError::NotFound(id.to_string()))
    }

    /// Shared tail of every mutation: ordered mirror propagation around
    /// the authoritative write, queue backstop, cache invalidation.
    async fn commit(&self, old: &GenerationRecord, record: &GenerationRecord) -> Result<()> {
        let unpublishing = old.is_mirrorable() && !record.is_mirrorable();
        if unpublishing {
            self.mirror.sync_remove(&record.id);
        }

        self.store.put_record(Some(old), record)?;

        if record.is_mirrorable() {
            self.mirror.sync_upsert(record);
            self.mirror.schedule(MirrorTask::upsert(record)).await;
        } else {
            self.mirror
                .schedule(MirrorTask::remove(&record.uid, &record.id))
                .await;
        }
        self.cache.invalidate(&scope(&record.uid)).await;
        Ok(())
    }
}

fn validate_uid(uid: &str) -> Result<()> {
    if uid.is_empty() {
        return Err(HistoryError::Validation("uid must not be empty".into()));
    }
    if uid.contains(':') {
        return Err(HistoryError::Validation("uid must not contain ':'".into()));
    }
    Ok(())
}

/// isDeleted forces the record private, whatever the media flags say.
fn enforce_deleted_invariant(record: &mut GenerationRecord) {
    if record.is_deleted {
        record.explicit_public = false;
        record.is_public = false;
        record.visibility = Visibility::Private;
    }
}

fn scope(uid: &str) -> String {
    format!("u:{uid}:")
}

fn fingerprint(query: &ListQuery) -> String {
    format!(
        "{}:{}:{}:{}:{}:{}:{:?}:{:?}",
        query.limit,
        query.cursor.as_deref().unwrap_or("-"),
        query
            .status
            .map(|s| s.as_str())
            .unwrap_or("-"),
        query.generation_type.as_deref().unwrap_or("-"),
        query
            .visibility
            .map(|v| match v {
                Visibility::Public => "public",
                Visibility::Private => "private",
            })
            .unwrap_or("-"),
        query.search.as_deref().unwrap_or("-"),
        query.sort_by,
        query.sort_order,
    )
}
