use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::{CasOutcome, Job, JobMetadata, JobStatus, JobStore, JobUpdate};
use crate::error::{with_store_timeout, StoreError};

/// Default job retention (24 hours).
pub const DEFAULT_JOB_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Job already exists: {0}")]
    AlreadyExists(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {job_id} is {current}, transition not allowed")]
    InvalidTransition { job_id: String, current: JobStatus },

    #[error("Status {0} cannot be written to the ledger")]
    InvalidTarget(JobStatus),

    #[error("Job store unavailable: {0}")]
    DependencyUnavailable(String),
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        Self::DependencyUnavailable(e.to_string())
    }
}

/// Extra data carried by a transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitionPayload {
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub processor_job_id: Option<String>,
}

impl TransitionPayload {
    pub fn result(result: serde_json::Value) -> Self {
        Self {
            result: Some(result),
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn processor_job_id(id: impl Into<String>) -> Self {
        Self {
            processor_job_id: Some(id.into()),
            ..Self::default()
        }
    }
}

/// Authoritative record of job status.
///
/// Every write is a compare-and-set: two concurrent transitions from the
/// same expected status can never both succeed, and a terminal job never
/// changes again.
#[derive(Clone)]
pub struct JobLedger {
    store: Arc<dyn JobStore>,
    ttl: Duration,
    store_timeout: Duration,
}

impl JobLedger {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            ttl: DEFAULT_JOB_TTL,
            store_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[instrument(level = "debug", skip(self, metadata))]
    pub async fn create(
        &self,
        job_id: &str,
        initial: JobStatus,
        metadata: JobMetadata,
    ) -> Result<Job, LedgerError> {
        if initial.is_terminal() || initial == JobStatus::Exists {
            return Err(LedgerError::InvalidTarget(initial));
        }

        let job = Job::new(job_id.to_string(), initial, metadata, self.ttl);
        let inserted =
            with_store_timeout(self.store_timeout, self.store.insert(&job, self.ttl)).await?;
        if !inserted {
            return Err(LedgerError::AlreadyExists(job_id.to_string()));
        }

        info!(job_id, status = %initial, "Job created");
        Ok(job)
    }

    /// Move a job to `to` if its current status is one of `from_expected`.
    ///
    /// Terminal statuses in `from_expected` are ignored. The payload is
    /// normalized to the target: only completed jobs carry a result and only
    /// failed jobs carry an error.
    #[instrument(level = "debug", skip(self, payload))]
    pub async fn transition(
        &self,
        job_id: &str,
        from_expected: &[JobStatus],
        to: JobStatus,
        payload: TransitionPayload,
    ) -> Result<Job, LedgerError> {
        if to == JobStatus::Exists {
            return Err(LedgerError::InvalidTarget(to));
        }

        let expected: Vec<JobStatus> = from_expected
            .iter()
            .copied()
            .filter(|s| !s.is_terminal() && *s != JobStatus::Exists)
            .collect();

        let update = JobUpdate {
            status: to,
            result: match to {
                JobStatus::Completed => payload.result,
                _ => None,
            },
            error: match to {
                JobStatus::Failed => Some(
                    payload
                        .error
                        .unwrap_or_else(|| "processing failed".to_string()),
                ),
                _ => None,
            },
            processor_job_id: payload.processor_job_id,
            updated_at: Utc::now(),
        };

        let outcome = with_store_timeout(
            self.store_timeout,
            self.store.compare_and_set(job_id, &expected, &update),
        )
        .await?;

        match outcome {
            CasOutcome::Applied(job) => {
                info!(job_id, status = %to, "Job transitioned");
                Ok(job)
            }
            CasOutcome::Mismatch(current) => {
                debug!(job_id, %current, target = %to, "Transition rejected");
                Err(LedgerError::InvalidTransition {
                    job_id: job_id.to_string(),
                    current,
                })
            }
            CasOutcome::Missing => {
                warn!(job_id, "Transition on unknown job");
                Err(LedgerError::NotFound(job_id.to_string()))
            }
        }
    }

    pub async fn get(&self, job_id: &str) -> Result<Job, LedgerError> {
        with_store_timeout(self.store_timeout, self.store.get(job_id))
            .await?
            .ok_or_else(|| LedgerError::NotFound(job_id.to_string()))
    }

    /// Connectivity probe against the backing store.
    pub async fn ping(&self) -> Result<(), StoreError> {
        with_store_timeout(self.store_timeout, self.store.ping()).await
    }
}
