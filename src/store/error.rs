use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No composite index is declared for this filter/sort combination.
    /// A typed value, so the query engine can trigger its fallback scan
    /// deterministically instead of sniffing error messages.
    #[error("no composite index for filter '{filter_field}' ordered by '{sort_field}'")]
    MissingIndex {
        filter_field: String,
        sort_field: String,
    },

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
