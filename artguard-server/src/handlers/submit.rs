//! Submission handler
//!
//! Handles POST /api/v1/submissions: duplicate check, then hand-off to the
//! processor.

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use artguard_core::{
    HashComputer, ImageHashes, JobStatus, SimilarityResult, Submission, SubmissionOutcome,
};

use crate::error::ApiError;
use crate::handlers::AppState;
use crate::multipart::MultipartFields;
use crate::validation::validate_required_text;

/// Response for an accepted or duplicate submission.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResponse {
    /// New job id, or the job that produced the matching artwork
    #[schema(example = "5b0e6f0c-2f7a-4c51-9a5e-6a1f0f1f3f1d")]
    pub job_id: String,

    /// `queued` for new work, `exists` for a duplicate
    #[schema(value_type = String, example = "queued")]
    pub status: JobStatus,

    /// The matching artwork when `status` is `exists`
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub artwork: Option<SimilarityResult>,
}

/// Submit an artwork for protection.
///
/// Accepts multipart/form-data with:
/// - `file`: the image
/// - `artist`, `title`: required text
/// - `metadata` (optional): JSON object passed through to the processor
/// - `hashes` (optional): JSON map of family to hex; computed from the image when absent
#[utoipa::path(
    post,
    path = "/api/v1/submissions",
    tag = "Submissions",
    request_body(content_type = "multipart/form-data", description = "Image plus artist, title and optional metadata/hashes"),
    responses(
        (status = 202, description = "New work queued for processing", body = SubmissionResponse),
        (status = 200, description = "Duplicate of an existing artwork", body = SubmissionResponse),
        (status = 400, description = "Invalid upload"),
        (status = 502, description = "Processor rejected the submission"),
        (status = 503, description = "Processor circuit open or a store is unavailable"),
        (status = 504, description = "Processor did not answer in time")
    )
)]
pub async fn submit_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SubmissionResponse>), ApiError> {
    let mut fields = MultipartFields::parse(&mut multipart, true, state.max_file_size).await?;

    let artist = validate_required_text("artist", fields.get_text("artist"))?.to_string();
    let title = validate_required_text("title", fields.get_text("title"))?.to_string();

    let metadata: serde_json::Value = fields
        .get_json("metadata")?
        .unwrap_or(serde_json::Value::Null);
    if !(metadata.is_null() || metadata.is_object()) {
        return Err(ApiError::bad_request("metadata must be a JSON object"));
    }

    let supplied: Option<ImageHashes> = fields.get_json("hashes")?;

    fields.require_file()?;
    let file = fields
        .take_file()
        .ok_or_else(|| ApiError::bad_request("No file provided"))?;
    let content_type = file
        .content_type
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let (image, hashes) = match supplied {
        Some(hashes) if !hashes.is_empty() => (file.data, hashes),
        _ => compute_hashes(file.data).await?,
    };

    let outcome = state
        .submissions
        .submit(Submission {
            artist,
            title,
            metadata,
            content_type,
            image,
            hashes,
        })
        .await?;

    Ok(match outcome {
        SubmissionOutcome::Queued(job) => (
            StatusCode::ACCEPTED,
            Json(SubmissionResponse {
                job_id: job.job_id,
                status: job.status,
                artwork: None,
            }),
        ),
        SubmissionOutcome::Duplicate { job_id, artwork } => (
            StatusCode::OK,
            Json(SubmissionResponse {
                job_id,
                status: JobStatus::Exists,
                artwork: Some(artwork),
            }),
        ),
    })
}

/// Decoding and hashing are CPU bound, so they run off the async workers.
async fn compute_hashes(image: Vec<u8>) -> Result<(Vec<u8>, ImageHashes), ApiError> {
    if !HashComputer::is_supported_format(&image) {
        return Err(ApiError::bad_request(
            "Unsupported image format. Supply precomputed 'hashes' or upload JPEG, PNG, GIF or WebP",
        ));
    }

    let (image, hashes) = tokio::task::spawn_blocking(move || {
        let hashes = HashComputer::default().hash_bytes(&image);
        (image, hashes)
    })
    .await
    .map_err(|e| ApiError::internal(format!("Hashing task failed: {}", e)))?;

    Ok((image, hashes?))
}
