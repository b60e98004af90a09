//! Processor callback handler
//!
//! Handles POST /api/v1/callbacks/processor. The bearer token is checked
//! before the body is even looked at, so an unauthenticated caller learns
//! nothing about which jobs exist.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use artguard_core::{CallbackAck, CallbackReport, JobStatus};

use crate::error::ApiError;
use crate::handlers::AppState;

/// Completion or progress report from the processor.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CallbackRequest {
    #[schema(example = "5b0e6f0c-2f7a-4c51-9a5e-6a1f0f1f3f1d")]
    pub job_id: String,

    /// `processing`, `completed` or `failed`
    #[schema(value_type = String, example = "completed")]
    pub status: JobStatus,

    /// Output artifact references for a completed job
    #[serde(default)]
    pub result: Option<serde_json::Value>,

    /// Message or structured error for a failed job
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl From<CallbackRequest> for CallbackReport {
    fn from(req: CallbackRequest) -> Self {
        Self {
            job_id: req.job_id,
            status: req.status,
            result: req.result,
            error: req.error,
        }
    }
}

/// Acknowledgment of a callback.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CallbackResponse {
    pub job_id: String,

    /// Job status after the callback
    #[schema(value_type = String, example = "completed")]
    pub status: JobStatus,

    /// False when the job had already moved on and nothing changed
    pub applied: bool,
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// Receive a status report for a job.
///
/// Redelivered or late reports for a job that already finished are
/// acknowledged with `applied: false`.
#[utoipa::path(
    post,
    path = "/api/v1/callbacks/processor",
    tag = "Callbacks",
    request_body = CallbackRequest,
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Report applied or already applied", body = CallbackResponse),
        (status = 400, description = "Malformed report"),
        (status = 401, description = "Missing or invalid token"),
        (status = 404, description = "Job never existed or has expired"),
        (status = 503, description = "Job store unavailable")
    )
)]
pub async fn callback_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<CallbackRequest>, JsonRejection>,
) -> Result<Json<CallbackResponse>, ApiError> {
    let token = bearer_token(&headers);
    state.callbacks.authenticate(token)?;

    let Json(request) = body.map_err(|e| {
        ApiError::bad_request(format!("Invalid callback body: {}", e.body_text()))
    })?;

    let ack = state.callbacks.handle(token, request.into()).await?;

    Ok(Json(match ack {
        CallbackAck::Applied(job) => CallbackResponse {
            job_id: job.job_id,
            status: job.status,
            applied: true,
        },
        CallbackAck::AlreadyApplied { job_id, current } => CallbackResponse {
            job_id,
            status: current,
            applied: false,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_token(&headers), Some("abc123"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc123"));
        assert_eq!(bearer_token(&headers), None);
    }
}
