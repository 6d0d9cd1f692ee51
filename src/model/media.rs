use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Closed set of media kinds the platform produces or accepts as input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
}

/// One media asset attached to a generation.
///
/// Fixed required fields (`id`, `kind`, `url`) plus optional derivatives,
/// with provider-specific extras carried in the open `provider_meta` map
/// rather than as ad hoc optional fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: String,
    pub kind: MediaKind,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<String>,
    /// Per-item public flag; `None` means "follow the document".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimized_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub provider_meta: BTreeMap<String, serde_json::Value>,
}

impl MediaItem {
    pub fn new(kind: MediaKind, id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            url: url.into(),
            original_url: None,
            storage_path: None,
            is_public: None,
            optimized_url: None,
            thumbnail_url: None,
            provider_meta: BTreeMap::new(),
        }
    }

    /// A patch "names" an item when it matches by id, url, or storage path.
    pub fn matches(&self, id: Option<&str>, url: Option<&str>, storage_path: Option<&str>) -> bool {
        if let Some(id) = id {
            return self.id == id;
        }
        if let Some(url) = url {
            return self.url == url;
        }
        if let Some(path) = storage_path {
            return self.storage_path.as_deref() == Some(path);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_precedence_is_id_then_url_then_path() {
        let mut item = MediaItem::new(MediaKind::Image, "m1", "https://cdn.example/a.png");
        item.storage_path = Some("images/a.png".into());

        assert!(item.matches(Some("m1"), None, None));
        // An id mismatch is final even if the url would have matched.
        assert!(!item.matches(Some("m2"), Some("https://cdn.example/a.png"), None));
        assert!(item.matches(None, Some("https://cdn.example/a.png"), None));
        assert!(item.matches(None, None, Some("images/a.png")));
        assert!(!item.matches(None, None, None));
    }

    #[test]
    fn serde_round_trip_keeps_open_metadata() {
        let mut item = MediaItem::new(MediaKind::Video, "v1", "https://cdn.example/v.mp4");
        item.provider_meta
            .insert("seed".into(), serde_json::json!(42));

        let json = serde_json::to_string(&item).unwrap();
        let back: MediaItem = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, MediaKind::Video);
        assert_eq!(back.provider_meta["seed"], serde_json::json!(42));
    }
}
