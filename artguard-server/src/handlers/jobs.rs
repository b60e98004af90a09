//! Job polling handler

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use artguard_core::{Job, JobStatus};

use crate::error::ApiError;
use crate::handlers::AppState;

/// Current state of a job.
///
/// `jobId` is minted by the gateway at submission and is the only id the
/// jobs and callback endpoints accept. The processor's own id for the same
/// work is reported separately as `processorJobId`.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    /// Gateway job id, returned by the submission endpoint
    #[schema(example = "5b0e6f0c-2f7a-4c51-9a5e-6a1f0f1f3f1d")]
    pub job_id: String,

    #[schema(value_type = String, example = "processing")]
    pub status: JobStatus,

    pub artist: String,
    pub title: String,

    /// Free-form metadata supplied with the submission
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,

    /// Identifier assigned by the processor once it accepted the work.
    /// Informational only: never use it in place of `jobId`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processor_job_id: Option<String>,

    /// Output artifact references, present once completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// Failure detail, present once failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.job_id,
            status: job.status,
            artist: job.metadata.artist,
            title: job.metadata.title,
            metadata: job.metadata.extra,
            processor_job_id: job.processor_job_id,
            result: job.result,
            error: job.error,
            created_at: job.created_at,
            updated_at: job.updated_at,
            expires_at: job.expires_at,
        }
    }
}

/// Poll a job by id.
///
/// Jobs expire after the configured TTL and then read as not found.
#[utoipa::path(
    get,
    path = "/api/v1/jobs/{job_id}",
    tag = "Jobs",
    params(
        ("job_id" = String, Path, description = "Job identifier returned at submission")
    ),
    responses(
        (status = 200, description = "Current job state", body = JobResponse),
        (status = 404, description = "Unknown or expired job"),
        (status = 503, description = "Job store unavailable")
    )
)]
pub async fn get_job_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state.ledger.get(&job_id).await?;
    Ok(Json(job.into()))
}
