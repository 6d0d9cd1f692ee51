use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::media::MediaItem;

/// Lifecycle state of a generation job.
///
/// `Generating` is the only initial state. `Completed` and `Failed` are
/// terminal; the only legal transitions are Generating -> Completed and
/// Generating -> Failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Generating,
    Completed,
    Failed,
}

impl GenerationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GenerationStatus::Completed | GenerationStatus::Failed)
    }

    pub fn can_transition_to(&self, next: GenerationStatus) -> bool {
        matches!(
            (self, next),
            (GenerationStatus::Generating, GenerationStatus::Completed)
                | (GenerationStatus::Generating, GenerationStatus::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationStatus::Generating => "generating",
            GenerationStatus::Completed => "completed",
            GenerationStatus::Failed => "failed",
        }
    }
}

/// Derived from `is_public`; kept on the document so feed consumers never
/// have to re-derive it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Private,
    Public,
}

impl Visibility {
    pub fn from_public(is_public: bool) -> Self {
        if is_public {
            Visibility::Public
        } else {
            Visibility::Private
        }
    }
}

/// Authoritative document tracking one user-submitted generation job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub id: String,
    pub uid: String,
    pub prompt: String,
    pub model: String,
    pub generation_type: String,
    pub status: GenerationStatus,
    /// Monotonic soft-delete flag: once true, never implicitly reset.
    pub is_deleted: bool,
    /// OR of `explicit_public` and any media item's own public flag.
    pub is_public: bool,
    /// The document-level flag as last requested by the caller, kept so
    /// later recomputes (e.g. after a media removal) know what was asked
    /// for rather than re-deriving it from the aggregate.
    #[serde(default)]
    pub explicit_public: bool,
    pub visibility: Visibility,
    #[serde(default)]
    pub images: Vec<MediaItem>,
    #[serde(default)]
    pub videos: Vec<MediaItem>,
    #[serde(default)]
    pub audios: Vec<MediaItem>,
    #[serde(default)]
    pub input_images: Vec<MediaItem>,
    #[serde(default)]
    pub input_videos: Vec<MediaItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_task_id: Option<String>,
    /// Set only when the record is Failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GenerationRecord {
    /// All output media arrays, in a fixed order.
    pub fn output_media(&self) -> impl Iterator<Item = &MediaItem> {
        self.images
            .iter()
            .chain(self.videos.iter())
            .chain(self.audios.iter())
    }

    /// True when every output media array is empty.
    pub fn has_no_output_media(&self) -> bool {
        self.images.is_empty() && self.videos.is_empty() && self.audios.is_empty()
    }

    /// Recompute `is_public`/`visibility` from an explicit document-level
    /// request and the per-item flags. An explicit `false` cannot hide a
    /// record whose individual media is still flagged public.
    pub fn recompute_visibility(&mut self, explicit: bool) {
        let any_media_public = self
            .output_media()
            .any(|item| item.is_public == Some(true));
        self.explicit_public = explicit;
        self.is_public = explicit || any_media_public;
        self.visibility = Visibility::from_public(self.is_public);
    }

    /// Bump `updated_at`, keeping it monotonically non-decreasing even if
    /// the clock steps backwards between writes.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = self.updated_at.max(now);
    }

    /// True when the record should appear in the public mirror.
    pub fn is_mirrorable(&self) -> bool {
        self.is_public && !self.is_deleted
    }
}
