use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use super::{ProcessorClient, ProcessorFailure, ProcessorSubmission};
use crate::breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker};
use crate::job::JobStatus;

/// Default hard timeout for a submission call.
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Rejected locally without contacting the processor.
    #[error("Processor circuit open, retry after {}s", .retry_after.as_secs().max(1))]
    CircuitOpen { retry_after: Duration },

    #[error("Processor error: {message}")]
    UpstreamError {
        status: Option<u16>,
        message: String,
    },

    #[error("Processor did not answer within {timeout_ms}ms")]
    UpstreamTimeout { timeout_ms: u64 },
}

/// Successful hand-off to the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub processor_job_id: String,
    /// Always `Queued`: acceptance by the processor means work is pending.
    pub status: JobStatus,
}

/// Result of one processor health probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeReport {
    pub reachable: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub breaker: BreakerSnapshot,
}

/// Sends work to the processor through a circuit breaker.
///
/// Each call runs on its own task under a hard timeout, so a caller that
/// goes away mid-flight never cancels the upstream request and the breaker
/// still learns the outcome.
#[derive(Clone)]
pub struct Dispatcher {
    client: Arc<dyn ProcessorClient>,
    breaker: Arc<CircuitBreaker>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(client: Arc<dyn ProcessorClient>, breaker: BreakerConfig) -> Self {
        Self {
            client,
            breaker: Arc::new(CircuitBreaker::new(breaker)),
            timeout: DEFAULT_DISPATCH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Cheap pre-flight check that does not consume the half-open trial.
    pub fn check_admission(&self) -> Result<(), DispatchError> {
        self.breaker
            .check()
            .map_err(|r| DispatchError::CircuitOpen {
                retry_after: r.retry_after,
            })
    }

    #[instrument(skip_all, fields(processor = self.client.name(), job_id = %submission.job_id))]
    pub async fn dispatch(
        &self,
        submission: ProcessorSubmission,
    ) -> Result<Dispatched, DispatchError> {
        let permit = self.breaker.try_acquire().map_err(|r| {
            warn!(
                job_id = %submission.job_id,
                retry_after_secs = r.retry_after.as_secs(),
                "Dispatch rejected, processor circuit open"
            );
            DispatchError::CircuitOpen {
                retry_after: r.retry_after,
            }
        })?;

        let client = Arc::clone(&self.client);
        let timeout = self.timeout;
        let job_id = submission.job_id.clone();
        let trial = permit.is_trial();

        let call = tokio::spawn(async move {
            let outcome = tokio::time::timeout(timeout, client.submit(&submission)).await;
            match &outcome {
                Ok(Ok(_)) => permit.success(),
                Ok(Err(failure)) if failure.processor_responded() => permit.success(),
                _ => permit.failure(),
            }
            outcome
        });

        let outcome = call.await.map_err(|e| DispatchError::UpstreamError {
            status: None,
            message: format!("dispatch task failed: {e}"),
        })?;

        match outcome {
            Ok(Ok(ack)) => {
                info!(
                    job_id = %job_id,
                    processor_job_id = %ack.job_id,
                    processor_status = ack.status.as_deref().unwrap_or("unknown"),
                    trial,
                    "Submission dispatched"
                );
                Ok(Dispatched {
                    processor_job_id: ack.job_id,
                    status: JobStatus::Queued,
                })
            }
            Ok(Err(failure)) => {
                warn!(job_id = %job_id, error = %failure, "Processor call failed");
                Err(match failure {
                    ProcessorFailure::Timeout => DispatchError::UpstreamTimeout {
                        timeout_ms: timeout.as_millis() as u64,
                    },
                    ProcessorFailure::Status { status, message } => DispatchError::UpstreamError {
                        status: Some(status),
                        message,
                    },
                    other => DispatchError::UpstreamError {
                        status: None,
                        message: other.to_string(),
                    },
                })
            }
            Err(_) => {
                warn!(
                    job_id = %job_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Processor call timed out"
                );
                Err(DispatchError::UpstreamTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Probe processor reachability. Probes never feed the breaker.
    #[instrument(skip_all, fields(processor = self.client.name()))]
    pub async fn probe(&self, timeout: Duration) -> ProbeReport {
        let start = Instant::now();
        let result = match tokio::time::timeout(timeout, self.client.probe()).await {
            Ok(r) => r,
            Err(_) => Err(ProcessorFailure::Timeout),
        };
        ProbeReport {
            reachable: result.is_ok(),
            latency_ms: start.elapsed().as_millis() as u64,
            error: result.err().map(|e| e.to_string()),
            breaker: self.breaker.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitState;
    use crate::hash::ImageHashes;
    use crate::processor::mock::{Scripted, ScriptedProcessor};

    fn submission(id: &str) -> ProcessorSubmission {
        ProcessorSubmission {
            job_id: id.into(),
            callback_url: "http://gateway/api/v1/callbacks/processor".into(),
            artist: "a".into(),
            title: "t".into(),
            metadata: serde_json::Value::Null,
            content_type: "image/png".into(),
            image: String::new(),
            hashes: ImageHashes::new(),
        }
    }

    fn dispatcher(processor: Arc<ScriptedProcessor>, threshold: u32) -> Dispatcher {
        Dispatcher::new(
            processor,
            BreakerConfig::default()
                .with_failure_threshold(threshold)
                .with_cooldown(Duration::from_secs(30)),
        )
        .with_timeout(Duration::from_secs(5))
    }

    fn server_error() -> ProcessorFailure {
        ProcessorFailure::Status {
            status: 500,
            message: "boom".into(),
        }
    }

    #[tokio::test]
    async fn test_successful_dispatch_maps_to_queued() {
        let processor = Arc::new(ScriptedProcessor::new());
        let d = dispatcher(processor.clone(), 5);
        let dispatched = d.dispatch(submission("j1")).await.unwrap();
        assert_eq!(dispatched.status, JobStatus::Queued);
        assert_eq!(dispatched.processor_job_id, "proc-j1");
        assert_eq!(processor.received()[0].job_id, "j1");
    }

    #[tokio::test]
    async fn test_upstream_error_carries_status() {
        let processor = Arc::new(ScriptedProcessor::new());
        processor.push(Scripted::Fail(server_error()));
        let d = dispatcher(processor, 5);
        let err = d.dispatch(submission("j1")).await.unwrap_err();
        assert_eq!(
            err,
            DispatchError::UpstreamError {
                status: Some(500),
                message: "boom".into()
            }
        );
    }

    #[tokio::test]
    async fn test_breaker_opens_and_stops_network_attempts() {
        let processor = Arc::new(ScriptedProcessor::new());
        processor.set_fallback(Some(server_error()));
        let d = dispatcher(processor.clone(), 5);

        for _ in 0..5 {
            assert!(matches!(
                d.dispatch(submission("j")).await,
                Err(DispatchError::UpstreamError { .. })
            ));
        }
        assert_eq!(d.breaker().state(), CircuitState::Open);

        let err = d.dispatch(submission("j6")).await.unwrap_err();
        assert!(matches!(err, DispatchError::CircuitOpen { .. }));
        assert!(d.check_admission().is_err());
        assert_eq!(processor.attempts(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let processor = Arc::new(ScriptedProcessor::new());
        processor.push(Scripted::Delay(Duration::from_secs(60)));
        let d = dispatcher(processor, 1);

        let err = d.dispatch(submission("slow")).await.unwrap_err();
        assert_eq!(err, DispatchError::UpstreamTimeout { timeout_ms: 5000 });
        assert_eq!(d.breaker().state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_through_trial() {
        let processor = Arc::new(ScriptedProcessor::new());
        processor.set_fallback(Some(server_error()));
        let d = dispatcher(processor.clone(), 2);
        let _ = d.dispatch(submission("a")).await;
        let _ = d.dispatch(submission("b")).await;
        assert_eq!(d.breaker().state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(30)).await;
        processor.set_fallback(None);
        d.dispatch(submission("trial")).await.unwrap();
        assert_eq!(d.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_malformed_ack_does_not_trip_breaker() {
        let processor = Arc::new(ScriptedProcessor::new());
        processor.set_fallback(Some(ProcessorFailure::InvalidResponse("eof".into())));
        let d = dispatcher(processor, 1);
        assert!(d.dispatch(submission("j")).await.is_err());
        assert_eq!(d.breaker().state(), CircuitState::Closed);
    }

    /// Log sink shared between the subscriber and the test.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[tokio::test]
    async fn test_dispatch_logs_name_the_processor() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let processor = Arc::new(ScriptedProcessor::new());
        let d = dispatcher(processor, 5);
        d.dispatch(submission("j-logged")).await.unwrap();

        let output = logs.contents();
        assert!(output.contains("Submission dispatched"), "{output}");
        assert!(output.contains("scripted"), "{output}");
        assert!(output.contains("j-logged"), "{output}");
    }

    #[tokio::test]
    async fn test_probe_reports_breaker() {
        let processor = Arc::new(ScriptedProcessor::new());
        let d = dispatcher(processor.clone(), 5);
        let report = d.probe(Duration::from_secs(1)).await;
        assert!(report.reachable);
        assert_eq!(report.breaker.state, CircuitState::Closed);

        processor.set_probe_ok(false);
        let report = d.probe(Duration::from_secs(1)).await;
        assert!(!report.reachable);
        assert!(report.error.is_some());
    }
}
