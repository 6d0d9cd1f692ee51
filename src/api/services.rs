use axum::{
    Json,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
};
use bytes::Bytes;
use http_body_util::BodyExt;

use super::{
    error::ApiError,
    models::{
        DebitRequest, DeleteParams, GrantRequest, HealthResponse, LedgerResponse, ListParams,
    },
    state::AppState,
    utils::{parse_content_type, require_uid, validate_body_size},
};
use crate::history::{CompletionPayload, CreatePayload, FailurePayload, UpdatePatch};
use crate::query::ListQuery;

/// Start a new generation (POST /generations).
///
/// The body is read raw so the configured payload cap applies before any
/// JSON work; prompts and input media references can be large.
pub async fn start_generation(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    let uid = require_uid(&headers)?;
    let payload: CreatePayload = parse_body(&state, &headers, body).await?;

    let record = state.history.create(&uid, payload).await?;
    Ok((axum::http::StatusCode::CREATED, Json(record)))
}

/// Install final media and mark the generation completed
/// (POST /generations/{id}/complete).
pub async fn complete_generation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<CompletionPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let uid = require_uid(&headers)?;
    let record = state.history.mark_completed(&uid, &id, payload).await?;
    Ok(Json(record))
}

/// Mark the generation failed (POST /generations/{id}/fail).
pub async fn fail_generation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<FailurePayload>,
) -> Result<impl IntoResponse, ApiError> {
    let uid = require_uid(&headers)?;
    let record = state.history.mark_failed(&uid, &id, payload).await?;
    Ok(Json(record))
}

/// General partial update (PATCH /generations/{id}).
pub async fn update_generation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    let uid = require_uid(&headers)?;
    let patch: UpdatePatch = parse_body(&state, &headers, body).await?;

    let record = state.history.update(&uid, &id, patch).await?;
    Ok(Json(record))
}

/// Soft-delete the record, or remove one media item when `media_id` is
/// given (DELETE /generations/{id}).
pub async fn delete_generation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<DeleteParams>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let uid = require_uid(&headers)?;
    let record = state
        .history
        .soft_delete(&uid, &id, params.media_id.as_deref())
        .await?;
    Ok(Json(record))
}

/// Single record read (GET /generations/{id}).
pub async fn get_generation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let uid = require_uid(&headers)?;
    let record = state
        .history
        .get(&uid, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("generation {id}")))?;
    Ok(Json(record))
}

/// Cursor-paginated listing (GET /generations).
pub async fn list_generations(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let uid = require_uid(&headers)?;

    let limit = params
        .limit
        .unwrap_or(state.config.query.default_page_size)
        .min(state.config.server.api.max_page_size)
        .max(1);

    let query = ListQuery {
        limit,
        cursor: params.cursor,
        status: params.status,
        generation_type: params.generation_type,
        visibility: params.visibility,
        search: params.search,
        sort_by: params.sort_by.unwrap_or_default(),
        sort_order: params.sort_order.unwrap_or_default(),
    };

    let page = state.history.list(&uid, &query).await?;
    Ok(Json(page))
}

/// Idempotent debit (POST /credits/debit).
pub async fn debit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DebitRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let uid = require_uid(&headers)?;
    let outcome = state.ledger.debit_if_absent(
        &uid,
        &req.idempotency_key,
        req.amount,
        &req.reason,
        req.meta,
    )?;
    let balance = state.ledger.balance(&uid)?;
    Ok(Json(LedgerResponse { outcome, balance }))
}

/// Idempotent plan grant (POST /credits/grant).
pub async fn grant(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<GrantRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let uid = require_uid(&headers)?;
    let outcome = state.ledger.grant_and_set_plan_if_absent(
        &uid,
        &req.idempotency_key,
        req.credits,
        &req.plan,
        &req.reason,
        req.meta,
    )?;
    let balance = state.ledger.balance(&uid)?;
    Ok(Json(LedgerResponse { outcome, balance }))
}

/// Public feed projection read (GET /mirror/{id}). No uid: the mirror is
/// a global partition.
pub async fn get_mirror(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .store
        .get_mirror(&id)
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("mirror {id}")))?;
    Ok(Json(record))
}

/// Health check endpoint (GET /health).
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    use std::collections::HashMap;

    let mut components = HashMap::new();
    components.insert("api".to_string(), "healthy".to_string());
    components.insert(
        "store".to_string(),
        if state.store.persist().is_ok() {
            "healthy".to_string()
        } else {
            "unhealthy".to_string()
        },
    );
    components.insert(
        "mirror_broker".to_string(),
        if state.broker.health_check() {
            "healthy".to_string()
        } else {
            "unhealthy".to_string()
        },
    );

    let all_healthy = components.values().all(|status| status == "healthy");
    let status_code = if all_healthy {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy { "healthy" } else { "unhealthy" }.to_string(),
        components,
        version: env!("CARGO_PKG_VERSION").to_string(),
        metrics: state.metrics.snapshot(),
    };

    (status_code, Json(response))
}

/// Read a raw body under the configured size cap and decode it as JSON.
/// Decompression is handled upstream by the middleware layer.
async fn parse_body<T: serde::de::DeserializeOwned>(
    state: &AppState,
    headers: &HeaderMap,
    body: axum::body::Body,
) -> Result<T, ApiError> {
    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::InvalidPayload("missing Content-Type header".into()))?;
    parse_content_type(content_type)?;

    let data: Bytes = body
        .collect()
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?
        .to_bytes();
    validate_body_size(&data, state.config.server.api.max_payload_bytes.as_usize())?;

    Ok(serde_json::from_slice(&data)?)
}
