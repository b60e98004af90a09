//! Submission flow: duplicate check, job creation, dispatch.
//!
//! The gateway owns the job id. A `queued` job exists in the ledger before
//! the processor ever hears about it, so a callback can never arrive for a
//! job the ledger does not know yet. The processor's own id is recorded on
//! the job once it acknowledges.

use std::sync::Arc;

use base64::Engine;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::hash::ImageHashes;
use crate::job::{Job, JobLedger, JobMetadata, JobStatus, LedgerError, TransitionPayload};
use crate::processor::{DispatchError, Dispatcher, ProcessorSubmission};
use crate::similarity::{SearchError, SimilarityEngine, SimilarityQuery, SimilarityResult};

/// Default score at or above which an upload counts as a duplicate.
pub const DEFAULT_DUPLICATE_THRESHOLD: f64 = 0.95;

/// A validated upload ready for the pipeline.
#[derive(Debug, Clone)]
pub struct Submission {
    pub artist: String,
    pub title: String,
    pub metadata: serde_json::Value,
    pub content_type: String,
    pub image: Vec<u8>,
    pub hashes: ImageHashes,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    /// New work was accepted and handed to the processor.
    Queued(Job),
    /// The upload matches an existing artwork; no job was created.
    Duplicate {
        job_id: String,
        artwork: SimilarityResult,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubmissionError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The job was created but could not be handed off; it is now failed.
    #[error("{error}")]
    Dispatch {
        job_id: Option<String>,
        error: DispatchError,
    },
}

#[derive(Clone)]
pub struct SubmissionService {
    engine: Arc<SimilarityEngine>,
    ledger: Arc<JobLedger>,
    dispatcher: Arc<Dispatcher>,
    callback_url: String,
    duplicate_threshold: f64,
}

impl SubmissionService {
    pub fn new(
        engine: Arc<SimilarityEngine>,
        ledger: Arc<JobLedger>,
        dispatcher: Arc<Dispatcher>,
        callback_url: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            ledger,
            dispatcher,
            callback_url: callback_url.into(),
            duplicate_threshold: DEFAULT_DUPLICATE_THRESHOLD,
        }
    }

    pub fn with_duplicate_threshold(mut self, threshold: f64) -> Self {
        self.duplicate_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn duplicate_threshold(&self) -> f64 {
        self.duplicate_threshold
    }

    /// Run one upload through duplicate detection and, if it is new work,
    /// create its job and hand it to the processor.
    pub async fn submit(
        &self,
        submission: Submission,
    ) -> Result<SubmissionOutcome, SubmissionError> {
        if submission.artist.trim().is_empty() || submission.title.trim().is_empty() {
            return Err(SubmissionError::Validation(
                "artist and title are required".to_string(),
            ));
        }

        if let Some(duplicate) = self.find_duplicate(&submission.hashes).await? {
            let job_id = duplicate
                .artwork
                .job_id
                .clone()
                .unwrap_or_else(|| duplicate.artwork.id.to_string());
            info!(
                %job_id,
                artwork_id = %duplicate.artwork.id,
                score = duplicate.score,
                "Duplicate submission detected"
            );
            return Ok(SubmissionOutcome::Duplicate {
                job_id,
                artwork: duplicate,
            });
        }

        // Fail fast while the breaker is open rather than create a job that
        // is immediately failed.
        self.dispatcher
            .check_admission()
            .map_err(|error| SubmissionError::Dispatch {
                job_id: None,
                error,
            })?;

        let job_id = Uuid::new_v4().to_string();
        let job = self
            .ledger
            .create(
                &job_id,
                JobStatus::Queued,
                JobMetadata {
                    artist: submission.artist.clone(),
                    title: submission.title.clone(),
                    content_type: Some(submission.content_type.clone()),
                    hashes: submission.hashes.clone(),
                    extra: submission.metadata.clone(),
                },
            )
            .await?;

        let work = ProcessorSubmission {
            job_id: job_id.clone(),
            callback_url: self.callback_url.clone(),
            artist: submission.artist,
            title: submission.title,
            metadata: submission.metadata,
            content_type: submission.content_type,
            image: base64::engine::general_purpose::STANDARD.encode(&submission.image),
            hashes: submission.hashes,
        };

        // Hand-off and bookkeeping run detached so a client disconnect
        // cannot leave the job half-recorded.
        let dispatcher = Arc::clone(&self.dispatcher);
        let ledger = Arc::clone(&self.ledger);
        let handoff = tokio::spawn(async move { hand_off(&dispatcher, &ledger, job, work).await });

        handoff.await.map_err(|e| SubmissionError::Dispatch {
            job_id: Some(job_id),
            error: DispatchError::UpstreamError {
                status: None,
                message: format!("hand-off task failed: {e}"),
            },
        })?
    }

    async fn find_duplicate(
        &self,
        hashes: &ImageHashes,
    ) -> Result<Option<SimilarityResult>, SubmissionError> {
        let query = SimilarityQuery::new(hashes.clone())
            .with_threshold(self.duplicate_threshold)
            .with_limit(1);
        match self.engine.find_similar(query).await {
            Ok(results) => Ok(results.into_iter().next()),
            Err(SearchError::InvalidQuery(msg)) => Err(SubmissionError::Validation(msg)),
            Err(e) => Err(e.into()),
        }
    }
}

async fn hand_off(
    dispatcher: &Dispatcher,
    ledger: &JobLedger,
    job: Job,
    work: ProcessorSubmission,
) -> Result<SubmissionOutcome, SubmissionError> {
    let job_id = job.job_id.clone();
    match dispatcher.dispatch(work).await {
        Ok(dispatched) => {
            let recorded = ledger
                .transition(
                    &job_id,
                    &[JobStatus::Queued],
                    dispatched.status,
                    TransitionPayload::processor_job_id(dispatched.processor_job_id),
                )
                .await;
            match recorded {
                Ok(job) => Ok(SubmissionOutcome::Queued(job)),
                Err(e) => {
                    // A callback may already have moved the job on.
                    debug!(%job_id, error = %e, "Processor id not recorded");
                    Ok(SubmissionOutcome::Queued(job))
                }
            }
        }
        Err(error) => {
            if let Err(e) = ledger
                .transition(
                    &job_id,
                    &[JobStatus::Queued],
                    JobStatus::Failed,
                    TransitionPayload::error(error.to_string()),
                )
                .await
            {
                warn!(%job_id, error = %e, "Could not mark undispatched job as failed");
            }
            Err(SubmissionError::Dispatch {
                job_id: Some(job_id),
                error,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artwork::{ArtworkRecord, MemoryArtworkStore};
    use crate::breaker::BreakerConfig;
    use crate::hash::HashFamily;
    use crate::job::MemoryJobStore;
    use crate::processor::{ProcessorFailure, ScriptedProcessor};
    use chrono::Utc;

    struct Fixture {
        service: SubmissionService,
        artworks: Arc<MemoryArtworkStore>,
        processor: Arc<ScriptedProcessor>,
        jobs: Arc<MemoryJobStore>,
        ledger: Arc<JobLedger>,
    }

    fn fixture() -> Fixture {
        let artworks = Arc::new(MemoryArtworkStore::new());
        let processor = Arc::new(ScriptedProcessor::new());
        let jobs = Arc::new(MemoryJobStore::new());
        let ledger = Arc::new(JobLedger::new(jobs.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            processor.clone(),
            BreakerConfig::default().with_failure_threshold(2),
        ));
        let service = SubmissionService::new(
            Arc::new(SimilarityEngine::new(artworks.clone())),
            ledger.clone(),
            dispatcher,
            "http://gateway/api/v1/callbacks/processor",
        );
        Fixture {
            service,
            artworks,
            processor,
            jobs,
            ledger,
        }
    }

    fn hashes(average: &str) -> ImageHashes {
        ImageHashes::new()
            .with_hex(HashFamily::Average, average)
            .unwrap()
            .with_hex(HashFamily::Difference, "0f0f0f0f0f0f0f0f")
            .unwrap()
    }

    fn submission(average: &str) -> Submission {
        Submission {
            artist: "A".into(),
            title: "T".into(),
            metadata: serde_json::json!({}),
            content_type: "image/png".into(),
            image: vec![1, 2, 3],
            hashes: hashes(average),
        }
    }

    #[tokio::test]
    async fn test_new_work_is_queued_and_dispatched() {
        let f = fixture();
        let outcome = f.service.submit(submission("ff00ff00ff00ff00")).await.unwrap();
        let SubmissionOutcome::Queued(job) = outcome else {
            panic!("expected queued");
        };
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.processor_job_id, Some(format!("proc-{}", job.job_id)));

        let sent = f.processor.received();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].job_id, job.job_id);
        assert_eq!(sent[0].image, "AQID");
        assert!(sent[0].callback_url.ends_with("/callbacks/processor"));
    }

    #[tokio::test]
    async fn test_exact_duplicate_creates_no_job() {
        let f = fixture();
        let existing = ArtworkRecord {
            id: Uuid::new_v4(),
            title: "Original".into(),
            artist: "A".into(),
            job_id: Some("job-original".into()),
            hashes: hashes("ff00ff00ff00ff00"),
            metadata: serde_json::Value::Null,
            uploaded_at: Utc::now(),
        };
        f.artworks.insert(existing.clone());

        let outcome = f.service.submit(submission("ff00ff00ff00ff00")).await.unwrap();
        match outcome {
            SubmissionOutcome::Duplicate { job_id, artwork } => {
                assert_eq!(job_id, "job-original");
                assert_eq!(artwork.artwork.id, existing.id);
                assert!(artwork.is_exact());
            }
            other => panic!("expected duplicate, got {other:?}"),
        }
        assert!(f.jobs.is_empty());
        assert_eq!(f.processor.attempts(), 0);
    }

    #[tokio::test]
    async fn test_missing_title_is_validation_error() {
        let f = fixture();
        let mut s = submission("01");
        s.title = "  ".into();
        assert!(matches!(
            f.service.submit(s).await,
            Err(SubmissionError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_no_hashes_is_validation_error() {
        let f = fixture();
        let mut s = submission("01");
        s.hashes = ImageHashes::new();
        assert!(matches!(
            f.service.submit(s).await,
            Err(SubmissionError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_dispatch_failure_marks_job_failed() {
        let f = fixture();
        f.processor.set_fallback(Some(ProcessorFailure::Status {
            status: 500,
            message: "boom".into(),
        }));
        let err = f.service.submit(submission("01")).await.unwrap_err();
        let SubmissionError::Dispatch {
            job_id: Some(job_id),
            error,
        } = err
        else {
            panic!("expected dispatch error");
        };
        assert!(matches!(error, DispatchError::UpstreamError { status: Some(500), .. }));
        let job = f.ledger.get(&job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_open_circuit_rejects_without_creating_job() {
        let f = fixture();
        f.processor.set_fallback(Some(ProcessorFailure::Timeout));
        let _ = f.service.submit(submission("01")).await;
        let _ = f.service.submit(submission("02")).await;
        let created = f.jobs.len();

        let err = f.service.submit(submission("03")).await.unwrap_err();
        assert!(matches!(
            err,
            SubmissionError::Dispatch {
                job_id: None,
                error: DispatchError::CircuitOpen { .. }
            }
        ));
        assert_eq!(f.jobs.len(), created);
        assert_eq!(f.processor.attempts(), 2);
    }

    #[tokio::test]
    async fn test_artwork_store_outage_surfaces() {
        let f = fixture();
        f.artworks.set_available(false);
        assert!(matches!(
            f.service.submit(submission("01")).await,
            Err(SubmissionError::Search(SearchError::DependencyUnavailable(_)))
        ));
    }
}
