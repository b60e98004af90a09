//! Similarity search handlers
//!
//! Handles POST /api/v1/similar and POST /api/v1/similar/batch.

use std::collections::BTreeMap;

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use artguard_core::{
    similarity::{DEFAULT_LIMIT, DEFAULT_THRESHOLD},
    BatchOutcome, BatchSlot, FamilyWeights, ImageHashes, SimilarityQuery, SimilarityResult,
};

use crate::error::ApiError;
use crate::handlers::AppState;

/// Maximum number of queries in one batch request.
pub const MAX_BATCH_QUERIES: usize = 50;

/// Request for artworks similar to a set of fingerprints.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SimilarRequest {
    /// Map of hash family to hex value; at least one family is required
    #[schema(value_type = BTreeMap<String, String>, example = json!({"average": "ffffffff00000000"}))]
    pub hashes: ImageHashes,

    /// Minimum weighted similarity in [0, 1] (default: 0.85)
    #[serde(default)]
    #[schema(example = 0.9)]
    pub threshold: Option<f64>,

    /// Maximum number of results (default: 10, capped at 100)
    #[serde(default)]
    #[schema(example = 10)]
    pub limit: Option<usize>,

    /// Per-family weight overrides
    #[serde(default)]
    #[schema(value_type = Option<BTreeMap<String, f64>>)]
    pub weights: Option<FamilyWeights>,
}

impl From<SimilarRequest> for SimilarityQuery {
    fn from(req: SimilarRequest) -> Self {
        SimilarityQuery::new(req.hashes)
            .with_threshold(req.threshold.unwrap_or(DEFAULT_THRESHOLD))
            .with_limit(req.limit.unwrap_or(DEFAULT_LIMIT))
            .with_weights(req.weights.unwrap_or_default())
    }
}

/// Ranked matches for one query.
#[derive(Debug, Serialize, ToSchema)]
pub struct SimilarResponse {
    #[schema(example = 1)]
    pub count: usize,

    /// Best match first
    #[schema(value_type = Vec<Object>)]
    pub results: Vec<SimilarityResult>,
}

/// Ordered batch of similarity queries.
#[derive(Debug, Deserialize, ToSchema)]
pub struct BatchRequest {
    /// Each entry is a similarity request plus a caller-chosen `queryId`
    #[schema(value_type = Vec<Object>)]
    pub queries: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchEntry {
    query_id: String,
    #[serde(flatten)]
    request: SimilarRequest,
}

/// Per-query outcomes in request order.
#[derive(Debug, Serialize, ToSchema)]
pub struct BatchResponse {
    /// Each slot carries `queryId` and either `status: ok` with `results`
    /// or `status: error` with `error` and `message`
    #[schema(value_type = Vec<Object>)]
    pub results: Vec<BatchSlot>,
}

/// Find artworks similar to the given fingerprints.
#[utoipa::path(
    post,
    path = "/api/v1/similar",
    tag = "Similarity",
    request_body = SimilarRequest,
    responses(
        (status = 200, description = "Ranked matches", body = SimilarResponse),
        (status = 400, description = "Invalid query"),
        (status = 503, description = "Artwork store unavailable")
    )
)]
pub async fn similar_handler(
    State(state): State<AppState>,
    body: Result<Json<SimilarRequest>, JsonRejection>,
) -> Result<Json<SimilarResponse>, ApiError> {
    let Json(request) =
        body.map_err(|e| ApiError::bad_request(format!("Invalid query: {}", e.body_text())))?;

    let results = state.engine.find_similar(request.into()).await?;

    Ok(Json(SimilarResponse {
        count: results.len(),
        results,
    }))
}

/// Run several similarity queries at once.
///
/// Each query succeeds or fails on its own; a malformed or failing entry
/// never affects its siblings.
#[utoipa::path(
    post,
    path = "/api/v1/similar/batch",
    tag = "Similarity",
    request_body = BatchRequest,
    responses(
        (status = 200, description = "One result slot per query, in request order", body = BatchResponse),
        (status = 400, description = "Malformed batch or too many queries")
    )
)]
pub async fn similar_batch_handler(
    State(state): State<AppState>,
    body: Result<Json<BatchRequest>, JsonRejection>,
) -> Result<Json<BatchResponse>, ApiError> {
    let Json(batch) =
        body.map_err(|e| ApiError::bad_request(format!("Invalid batch: {}", e.body_text())))?;

    if batch.queries.is_empty() {
        return Err(ApiError::bad_request("Batch must contain at least one query"));
    }
    if batch.queries.len() > MAX_BATCH_QUERIES {
        return Err(ApiError::bad_request(format!(
            "Batch of {} queries exceeds the maximum of {}",
            batch.queries.len(),
            MAX_BATCH_QUERIES
        )));
    }

    // Entries that fail to parse get their error slot now; the rest run
    // together and are merged back in order.
    let mut slots: Vec<Option<BatchSlot>> = Vec::with_capacity(batch.queries.len());
    let mut runnable = Vec::new();
    let mut positions = Vec::new();

    for (index, raw) in batch.queries.into_iter().enumerate() {
        let fallback_id = raw
            .get("queryId")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| index.to_string());

        match serde_json::from_value::<BatchEntry>(raw) {
            Ok(entry) => {
                slots.push(None);
                positions.push(index);
                runnable.push((entry.query_id, entry.request.into()));
            }
            Err(e) => slots.push(Some(BatchSlot {
                query_id: fallback_id,
                outcome: BatchOutcome::Error {
                    error: "invalid_query".to_string(),
                    message: e.to_string(),
                },
            })),
        }
    }

    let ran = state.engine.find_similar_batch(runnable).await;
    for (position, slot) in positions.into_iter().zip(ran) {
        slots[position] = Some(slot);
    }

    Ok(Json(BatchResponse {
        results: slots.into_iter().flatten().collect(),
    }))
}
