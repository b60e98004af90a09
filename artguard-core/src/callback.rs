//! Completion and progress reports from the processor.
//!
//! Callbacks are authenticated with a shared bearer token and applied to the
//! ledger as compare-and-set transitions out of the in-flight statuses. A
//! redelivered callback for a job that already reached a terminal status is
//! acknowledged without changing anything.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{info, warn};

use crate::job::{Job, JobLedger, JobStatus, LedgerError, TransitionPayload};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallbackError {
    #[error("Invalid callback credentials")]
    Unauthorized,

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Status {0} is not a valid callback status")]
    InvalidStatus(JobStatus),

    #[error("Job store unavailable: {0}")]
    DependencyUnavailable(String),
}

/// Callback body sent by the processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackReport {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Either a plain message or a structured error object
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl CallbackReport {
    fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|e| match e {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Object(o) => o
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| e.to_string()),
            other => other.to_string(),
        })
    }
}

/// What happened to a valid callback.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackAck {
    Applied(Job),
    /// The job had already moved on; nothing was written.
    AlreadyApplied { job_id: String, current: JobStatus },
}

impl CallbackAck {
    pub fn status(&self) -> JobStatus {
        match self {
            Self::Applied(job) => job.status,
            Self::AlreadyApplied { current, .. } => *current,
        }
    }
}

#[derive(Clone)]
pub struct CallbackHandler {
    ledger: Arc<JobLedger>,
    token: String,
}

impl CallbackHandler {
    /// An empty token rejects every callback.
    pub fn new(ledger: Arc<JobLedger>, token: impl Into<String>) -> Self {
        Self {
            ledger,
            token: token.into(),
        }
    }

    /// Constant-time check of a presented bearer token.
    pub fn authenticate(&self, presented: Option<&str>) -> Result<(), CallbackError> {
        let Some(presented) = presented else {
            return Err(CallbackError::Unauthorized);
        };
        if self.token.is_empty() {
            return Err(CallbackError::Unauthorized);
        }
        if bool::from(presented.as_bytes().ct_eq(self.token.as_bytes())) {
            Ok(())
        } else {
            Err(CallbackError::Unauthorized)
        }
    }

    pub async fn handle(
        &self,
        presented_token: Option<&str>,
        report: CallbackReport,
    ) -> Result<CallbackAck, CallbackError> {
        if let Err(e) = self.authenticate(presented_token) {
            warn!(job_id = %report.job_id, "Rejected callback with bad credentials");
            return Err(e);
        }

        // Progress reports may repeat; terminal reports land exactly once.
        let from = match report.status {
            JobStatus::Completed | JobStatus::Failed | JobStatus::Processing => {
                &[JobStatus::Queued, JobStatus::Processing][..]
            }
            other => return Err(CallbackError::InvalidStatus(other)),
        };

        let payload = TransitionPayload {
            result: report.result.clone(),
            error: report.error_message(),
            processor_job_id: None,
        };

        match self
            .ledger
            .transition(&report.job_id, from, report.status, payload)
            .await
        {
            Ok(job) => Ok(CallbackAck::Applied(job)),
            Err(LedgerError::InvalidTransition { job_id, current }) => {
                info!(
                    %job_id,
                    %current,
                    reported = %report.status,
                    "Duplicate or stale callback ignored"
                );
                Ok(CallbackAck::AlreadyApplied { job_id, current })
            }
            Err(LedgerError::NotFound(job_id)) => {
                warn!(%job_id, "Callback for unknown job");
                Err(CallbackError::NotFound(job_id))
            }
            Err(e) => Err(CallbackError::DependencyUnavailable(e.to_string())),
        }
    }
}
