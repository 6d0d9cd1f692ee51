//! Pure helper functions for HTTP request processing.

use axum::http::HeaderMap;

use crate::api::error::ApiError;

/// Parses and validates Content-Type header for application/json.
///
/// Accepts `application/json` with or without a charset parameter;
/// rejects lookalikes such as `application/jsonp` or `text/json`.
pub fn parse_content_type(content_type: &str) -> Result<mime::Mime, ApiError> {
    let media_type: mime::Mime = content_type.parse().map_err(|_| {
        ApiError::InvalidPayload(format!("invalid Content-Type: {}", content_type))
    })?;

    if media_type.type_() != mime::APPLICATION || media_type.subtype() != mime::JSON {
        return Err(ApiError::InvalidPayload(format!(
            "Content-Type must be application/json, got: {}/{}",
            media_type.type_(),
            media_type.subtype()
        )));
    }

    Ok(media_type)
}

/// Validates that body size does not exceed the maximum allowed size.
pub fn validate_body_size(data: &[u8], max_size: usize) -> Result<(), ApiError> {
    if data.len() > max_size {
        return Err(ApiError::PayloadTooLarge(data.len()));
    }
    Ok(())
}

/// Extract the caller identity from the `X-Genloom-Uid` header.
pub fn require_uid(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("X-Genloom-Uid")
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::InvalidPayload("X-Genloom-Uid header is required".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_accepts_json_variants() {
        assert!(parse_content_type("application/json").is_ok());
        assert!(parse_content_type("application/json; charset=utf-8").is_ok());
    }

    #[test]
    fn content_type_rejects_lookalikes() {
        assert!(parse_content_type("application/jsonp").is_err());
        assert!(parse_content_type("text/json").is_err());
        assert!(parse_content_type("").is_err());
    }

    #[test]
    fn body_size_limit_is_inclusive() {
        let data = vec![0u8; 1000];
        assert!(validate_body_size(&data, 1000).is_ok());
        assert!(matches!(
            validate_body_size(&data, 999),
            Err(ApiError::PayloadTooLarge(1000))
        ));
    }

    #[test]
    fn uid_header_is_required_and_non_empty() {
        let mut headers = HeaderMap::new();
        assert!(require_uid(&headers).is_err());

        headers.insert("X-Genloom-Uid", "".parse().unwrap());
        assert!(require_uid(&headers).is_err());

        headers.insert("X-Genloom-Uid", "u1".parse().unwrap());
        assert_eq!(require_uid(&headers).unwrap(), "u1");
    }
}
