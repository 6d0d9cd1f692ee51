//! Wire DTOs for the HTTP boundary.
//!
//! The exposed surface is exactly the engine's operations: start,
//! complete, fail, update, soft-delete, list, and the two credit
//! operations. Caller identity arrives in the `X-Genloom-Uid` header;
//! authentication itself is handled upstream.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::model::{GenerationStatus, Visibility};
use crate::observability::MetricsSnapshot;
use crate::query::{SortBy, SortOrder};

#[derive(Debug, Deserialize, Default)]
pub struct ListParams {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub status: Option<GenerationStatus>,
    #[serde(default)]
    pub generation_type: Option<String>,
    #[serde(default)]
    pub visibility: Option<Visibility>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub sort_by: Option<SortBy>,
    #[serde(default)]
    pub sort_order: Option<SortOrder>,
}

#[derive(Debug, Deserialize, Default)]
pub struct DeleteParams {
    #[serde(default)]
    pub media_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DebitRequest {
    pub idempotency_key: String,
    pub amount: i64,
    pub reason: String,
    #[serde(default)]
    pub meta: Value,
}

#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    pub idempotency_key: String,
    pub credits: i64,
    pub plan: String,
    pub reason: String,
    #[serde(default)]
    pub meta: Value,
}

#[derive(Debug, Serialize)]
pub struct LedgerResponse {
    pub outcome: crate::ledger::ApplyOutcome,
    pub balance: i64,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HashMap<String, String>,
    pub version: String,
    pub metrics: MetricsSnapshot,
}
