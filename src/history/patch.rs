//! Mutation payloads for the generation record store.

use serde::Deserialize;

use crate::model::{GenerationRecord, MediaItem};

use super::HistoryError;

/// Payload for starting a new generation.
#[derive(Debug, Clone, Deserialize, bon::Builder)]
pub struct CreatePayload {
    pub prompt: String,
    pub model: String,
    pub generation_type: String,
    #[serde(default)]
    pub is_public: Option<bool>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub provider_task_id: Option<String>,
    #[serde(default)]
    #[builder(default)]
    pub input_images: Vec<MediaItem>,
    #[serde(default)]
    #[builder(default)]
    pub input_videos: Vec<MediaItem>,
}

/// Final media and metadata installed when a generation completes.
#[derive(Debug, Clone, Default, Deserialize, bon::Builder)]
pub struct CompletionPayload {
    #[serde(default)]
    #[builder(default)]
    pub images: Vec<MediaItem>,
    #[serde(default)]
    #[builder(default)]
    pub videos: Vec<MediaItem>,
    #[serde(default)]
    #[builder(default)]
    pub audios: Vec<MediaItem>,
    #[serde(default)]
    pub is_public: Option<bool>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider_task_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FailurePayload {
    pub error: String,
    #[serde(default)]
    pub provider_task_id: Option<String>,
}

/// General partial update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePatch {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub generation_type: Option<String>,
    #[serde(default)]
    pub is_public: Option<bool>,
    /// Only `true` is accepted; clearing the flag is not exposed.
    #[serde(default)]
    pub is_deleted: Option<bool>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub provider_task_id: Option<String>,
    #[serde(default)]
    pub media: Option<MediaPatch>,
}

/// Patch for a single media item, selected by id, url, or storage path.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaPatch {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub storage_path: Option<String>,
    #[serde(default)]
    pub set: MediaPatchSet,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaPatchSet {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub original_url: Option<String>,
    #[serde(default)]
    pub storage_path: Option<String>,
    #[serde(default)]
    pub is_public: Option<bool>,
    #[serde(default)]
    pub optimized_url: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub provider_meta: std::collections::BTreeMap<String, serde_json::Value>,
}

impl MediaPatch {
    pub fn has_selector(&self) -> bool {
        self.id.is_some() || self.url.is_some() || self.storage_path.is_some()
    }
}

/// Merge a media patch into the first matching item, searching output
/// arrays before input arrays.
pub fn apply_media_patch(record: &mut GenerationRecord, patch: &MediaPatch) -> Result<(), HistoryError> {
    if !patch.has_selector() {
        return Err(HistoryError::Validation(
            "media patch needs an id, url, or storage_path selector".into(),
        ));
    }

    let arrays = [
        &mut record.images,
        &mut record.videos,
        &mut record.audios,
        &mut record.input_images,
        &mut record.input_videos,
    ];
    for array in arrays {
        if let Some(item) = array.iter_mut().find(|item| {
            item.matches(
                patch.id.as_deref(),
                patch.url.as_deref(),
                patch.storage_path.as_deref(),
            )
        }) {
            merge_into(item, &patch.set);
            return Ok(());
        }
    }

    Err(HistoryError::Validation(
        "media patch matched no item on this record".into(),
    ))
}

fn merge_into(item: &mut MediaItem, set: &MediaPatchSet) {
    if let Some(url) = &set.url {
        item.url = url.clone();
    }
    if set.original_url.is_some() {
        item.original_url = set.original_url.clone();
    }
    if set.storage_path.is_some() {
        item.storage_path = set.storage_path.clone();
    }
    if set.is_public.is_some() {
        item.is_public = set.is_public;
    }
    if set.optimized_url.is_some() {
        item.optimized_url = set.optimized_url.clone();
    }
    if set.thumbnail_url.is_some() {
        item.thumbnail_url = set.thumbnail_url.clone();
    }
    for (key, value) in &set.provider_meta {
        item.provider_meta.insert(key.clone(), value.clone());
    }
}

/// Remove the media item with `media_id` from the output arrays.
/// Returns whether anything was removed.
pub fn remove_media_item(record: &mut GenerationRecord, media_id: &str) -> bool {
    for array in [&mut record.images, &mut record.videos, &mut record.audios] {
        let before = array.len();
        array.retain(|item| item.id != media_id);
        if array.len() < before {
            return true;
        }
    }
    false
}
