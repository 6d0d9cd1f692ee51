use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::media::MediaItem;
use super::record::GenerationRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorOp {
    Upsert,
    Update,
    Remove,
}

/// Durable work item for the mirror consumer. Consumed at-least-once, so
/// applying the same task twice must converge to the same mirror state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorTask {
    pub op: MirrorOp,
    pub uid: String,
    pub record_id: String,
    /// Snapshot or patch captured at enqueue time. The consumer resolves
    /// the authoritative record at apply time; the payload is kept for
    /// inspection of dead-lettered tasks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl MirrorTask {
    pub fn upsert(record: &GenerationRecord) -> Self {
        Self {
            op: MirrorOp::Upsert,
            uid: record.uid.clone(),
            record_id: record.id.clone(),
            payload: serde_json::to_value(record).ok(),
        }
    }

    pub fn update(uid: &str, record_id: &str, patch: serde_json::Value) -> Self {
        Self {
            op: MirrorOp::Update,
            uid: uid.to_string(),
            record_id: record_id.to_string(),
            payload: Some(patch),
        }
    }

    pub fn remove(uid: &str, record_id: &str) -> Self {
        Self {
            op: MirrorOp::Remove,
            uid: uid.to_string(),
            record_id: record_id.to_string(),
            payload: None,
        }
    }
}

/// A mirror task that exhausted its retry budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadMirrorTask {
    pub task: MirrorTask,
    pub error: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

/// Denormalized public-feed projection of a published generation, keyed
/// by the same id as its source record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorRecord {
    pub id: String,
    pub uid: String,
    pub prompt: String,
    pub model: String,
    pub generation_type: String,
    #[serde(default)]
    pub images: Vec<MediaItem>,
    #[serde(default)]
    pub videos: Vec<MediaItem>,
    #[serde(default)]
    pub audios: Vec<MediaItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MirrorRecord {
    /// Project the feed view of a record. Items explicitly flagged
    /// private stay out of the projection even when the record itself is
    /// public.
    pub fn project(record: &GenerationRecord) -> Self {
        let keep = |items: &[MediaItem]| -> Vec<MediaItem> {
            items
                .iter()
                .filter(|item| item.is_public != Some(false))
                .cloned()
                .collect()
        };
        Self {
            id: record.id.clone(),
            uid: record.uid.clone(),
            prompt: record.prompt.clone(),
            model: record.model.clone(),
            generation_type: record.generation_type.clone(),
            images: keep(&record.images),
            videos: keep(&record.videos),
            audios: keep(&record.audios),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}
