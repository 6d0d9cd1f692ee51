use thiserror::Error;

use crate::store::{INDEXABLE_FIELDS, SORT_FIELDS};

use super::models::Config;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("composite index filter field '{0}' is not indexable (expected one of {1})")]
    UnknownFilterField(String, String),

    #[error("composite index sort field '{0}' is not a sort field (expected one of {1})")]
    UnknownSortField(String, String),

    #[error("{field} must be at least {min}, got {got}")]
    BelowMinimum {
        field: &'static str,
        min: usize,
        got: usize,
    },

    #[error("default_page_size ({default}) exceeds max_page_size ({max})")]
    PageSizeAboveMax { default: usize, max: usize },
}

pub fn validate(config: &Config) -> Result<(), ValidationError> {
    for (filter_field, sort_field) in &config.query.composite_indexes {
        if !INDEXABLE_FIELDS.contains(&filter_field.as_str()) {
            return Err(ValidationError::UnknownFilterField(
                filter_field.clone(),
                INDEXABLE_FIELDS.join(", "),
            ));
        }
        if !SORT_FIELDS.contains(&sort_field.as_str()) {
            return Err(ValidationError::UnknownSortField(
                sort_field.clone(),
                SORT_FIELDS.join(", "),
            ));
        }
    }

    check_min("query.over_fetch_factor", config.query.over_fetch_factor, 1)?;
    check_min(
        "query.scan_max_iterations",
        config.query.scan_max_iterations,
        1,
    )?;
    check_min("query.default_page_size", config.query.default_page_size, 1)?;
    check_min("mirror.workers", config.mirror.workers, 1)?;
    check_min("mirror.channel_size", config.mirror.channel_size, 1)?;
    check_min("mirror.max_attempts", config.mirror.max_attempts as usize, 1)?;

    if config.query.default_page_size > config.server.api.max_page_size {
        return Err(ValidationError::PageSizeAboveMax {
            default: config.query.default_page_size,
            max: config.server.api.max_page_size,
        });
    }

    Ok(())
}

fn check_min(field: &'static str, got: usize, min: usize) -> Result<(), ValidationError> {
    if got < min {
        return Err(ValidationError::BelowMinimum { field, min, got });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn unknown_index_field_is_rejected() {
        let mut config = Config::default();
        config
            .query
            .composite_indexes
            .push(("prompt".to_string(), "created_at".to_string()));
        assert!(matches!(
            validate(&config),
            Err(ValidationError::UnknownFilterField(..))
        ));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut config = Config::default();
        config.mirror.workers = 0;
        assert!(matches!(
            validate(&config),
            Err(ValidationError::BelowMinimum { field: "mirror.workers", .. })
        ));
    }

    #[test]
    fn oversized_default_page_is_rejected() {
        let mut config = Config::default();
        config.query.default_page_size = 500;
        assert!(matches!(
            validate(&config),
            Err(ValidationError::PageSizeAboveMax { .. })
        ));
    }
}
