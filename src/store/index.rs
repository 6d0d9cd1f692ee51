//! Composite-index registry and query planning types.
//!
//! The store only answers equality-filtered, ordered queries for which a
//! composite index was declared up front (in configuration). Everything
//! else yields a typed [`StoreError::MissingIndex`] so the caller can
//! decide how to degrade.

use crate::model::GenerationRecord;

/// Filter fields that can be backed by a composite index.
pub const INDEXABLE_FIELDS: &[&str] = &["status", "generation_type", "visibility"];

/// Sort fields the order partition maintains for every record.
pub const SORT_FIELDS: &[&str] = &["created_at", "updated_at"];

/// Declared `(filter_field, sort_field)` pairs.
#[derive(Debug, Clone, Default)]
pub struct IndexRegistry {
    composites: Vec<(String, String)>,
}

impl IndexRegistry {
    pub fn new(composites: Vec<(String, String)>) -> Self {
        Self { composites }
    }

    pub fn covers(&self, filter_field: &str, sort_field: &str) -> bool {
        self.composites
            .iter()
            .any(|(f, s)| f == filter_field && s == sort_field)
    }

    pub fn composites(&self) -> &[(String, String)] {
        &self.composites
    }
}

/// Extract the indexed string value of `field` from a record.
pub fn field_value(record: &GenerationRecord, field: &str) -> Option<String> {
    match field {
        "status" => Some(record.status.as_str().to_string()),
        "generation_type" => Some(record.generation_type.clone()),
        "visibility" => Some(
            if record.is_public { "public" } else { "private" }.to_string(),
        ),
        _ => None,
    }
}

/// Equality filter pushed down to the store.
#[derive(Debug, Clone)]
pub struct EqualityFilter {
    pub field: String,
    pub value: String,
}

/// Cursor position: the sort value and id of the last item of the
/// previous page. The next page starts strictly after it.
#[derive(Debug, Clone)]
pub struct StartAfter {
    pub sort_millis: i64,
    pub id: String,
}

/// One planned store query.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub equality: Option<EqualityFilter>,
    pub sort_field: String,
    pub descending: bool,
    pub start_after: Option<StartAfter>,
    pub fetch_limit: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_only_declared_pairs() {
        let registry = IndexRegistry::new(vec![(
            "generation_type".to_string(),
            "created_at".to_string(),
        )]);
        assert!(registry.covers("generation_type", "created_at"));
        assert!(!registry.covers("generation_type", "updated_at"));
        assert!(!registry.covers("status", "created_at"));
    }
}
