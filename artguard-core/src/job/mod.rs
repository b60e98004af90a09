//! Job lifecycle tracking.
//!
//! A job is created when a submission is accepted and then only moves
//! through [`JobLedger::transition`], which is an atomic compare-and-set on
//! the job's status. Completed and failed are terminal.

pub mod ledger;
pub mod memory;

pub use ledger::{JobLedger, LedgerError, TransitionPayload};
pub use memory::MemoryJobStore;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::hash::ImageHashes;

/// Status of a submission job.
///
/// `Exists` is never stored: it only appears in submission responses when
/// the upload was a duplicate and no job was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Exists,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Exists => "exists",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "exists" => Ok(Self::Exists),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// What the submitter told us about the artwork.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMetadata {
    pub artist: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub hashes: ImageHashes,
    /// Free-form client metadata
    #[serde(default)]
    pub extra: serde_json::Value,
}

/// One tracked submission.
///
/// `job_id` is minted by the gateway before dispatch and keys every lookup,
/// including processor callbacks. The processor's acknowledgement id is
/// kept alongside in `processor_job_id` and never replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: String,
    pub status: JobStatus,
    pub metadata: JobMetadata,
    /// Identifier the processor assigned, once dispatch succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processor_job_id: Option<String>,
    /// Output artifact references; only set once completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Failure detail; only set once failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Job {
    pub fn new(job_id: String, status: JobStatus, metadata: JobMetadata, ttl: Duration) -> Self {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::days(1));
        Self {
            job_id,
            status,
            metadata,
            processor_job_id: None,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
        }
    }

    /// Apply a store update in place.
    pub(crate) fn apply(&mut self, update: &JobUpdate) {
        self.status = update.status;
        self.result = update.result.clone();
        self.error = update.error.clone();
        if let Some(id) = &update.processor_job_id {
            self.processor_job_id = Some(id.clone());
        }
        self.updated_at = update.updated_at;
    }
}

/// New mutable state written by a successful compare-and-set.
///
/// `result` and `error` are replaced wholesale. `processor_job_id` is only
/// written when present.
#[derive(Debug, Clone, PartialEq)]
pub struct JobUpdate {
    pub status: JobStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub processor_job_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of a store-level compare-and-set.
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome {
    /// The status matched and the update was written.
    Applied(Job),
    /// The job exists but its status was not in the expected set.
    Mismatch(JobStatus),
    /// No such job (never created, or expired).
    Missing,
}

/// Key-value storage with an atomic compare-and-set primitive.
///
/// Implementations must make `insert` and `compare_and_set` atomic with
/// respect to each other and to concurrent callers in other processes.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job with a time-to-live. Returns `false` when the id is
    /// already taken.
    async fn insert(&self, job: &Job, ttl: Duration) -> Result<bool, StoreError>;

    /// Write `update` only if the job's current status is in `expected`.
    async fn compare_and_set(
        &self,
        job_id: &str,
        expected: &[JobStatus],
        update: &JobUpdate,
    ) -> Result<CasOutcome, StoreError>;

    async fn get(&self, job_id: &str) -> Result<Option<Job>, StoreError>;

    /// Connectivity probe.
    async fn ping(&self) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serde_is_lowercase() {
        assert_eq!(
            serde_json::to_value(JobStatus::Processing).unwrap(),
            "processing"
        );
        let parsed: JobStatus = serde_json::from_value("completed".into()).unwrap();
        assert_eq!(parsed, JobStatus::Completed);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!("QUEUED".parse::<JobStatus>().unwrap(), JobStatus::Queued);
        assert!("done".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_job_expiry_follows_ttl() {
        let job = Job::new(
            "j1".into(),
            JobStatus::Queued,
            JobMetadata {
                artist: "a".into(),
                title: "t".into(),
                content_type: None,
                hashes: ImageHashes::new(),
                extra: serde_json::Value::Null,
            },
            Duration::from_secs(3600),
        );
        assert_eq!((job.expires_at - job.created_at).num_seconds(), 3600);
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["jobId"], "j1");
        assert!(json.get("result").is_none());
    }
}
