//! Dependency health aggregation.
//!
//! The gateway is only as healthy as the things it depends on. Each probe
//! runs concurrently under its own timeout and the results are combined
//! into one overall status:
//!
//! | processor | artwork store | job store | overall   |
//! |-----------|---------------|-----------|-----------|
//! | up        | up            | up        | healthy   |
//! | degraded  | up            | up        | degraded  |
//! | down      | up            | up        | degraded  |
//! | any       | down          | any       | unhealthy |
//! | any       | any           | down      | unhealthy |
//!
//! The processor counts as down when its probe fails or its breaker is open,
//! and degraded while the breaker is half-open. Lookups and duplicate
//! checks keep working without it, so it never makes the gateway unhealthy
//! on its own.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::artwork::ArtworkStore;
use crate::breaker::{BreakerSnapshot, CircuitState};
use crate::error::{with_store_timeout, StoreError};
use crate::job::JobLedger;
use crate::processor::Dispatcher;

pub const PROCESSOR: &str = "processor";
pub const ARTWORK_STORE: &str = "artworkStore";
pub const JOB_STORE: &str = "jobStore";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyStatus {
    Up,
    Degraded,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyHealth {
    pub status: DependencyStatus,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breaker: Option<BreakerSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: OverallStatus,
    pub dependencies: BTreeMap<String, DependencyHealth>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    /// Ready to take traffic unless a critical dependency is down.
    pub fn is_ready(&self) -> bool {
        self.status != OverallStatus::Unhealthy
    }
}

/// Combine dependency statuses. The artwork store and job store are
/// critical; the processor is not.
pub fn overall_status(
    processor: DependencyStatus,
    artwork_store: DependencyStatus,
    job_store: DependencyStatus,
) -> OverallStatus {
    let critical = [artwork_store, job_store];
    if critical.contains(&DependencyStatus::Down) {
        return OverallStatus::Unhealthy;
    }
    if processor != DependencyStatus::Up || critical.contains(&DependencyStatus::Degraded) {
        return OverallStatus::Degraded;
    }
    OverallStatus::Healthy
}

/// Processor status from its probe and breaker state.
pub fn processor_status(reachable: bool, breaker: CircuitState) -> DependencyStatus {
    match (reachable, breaker) {
        (false, _) | (_, CircuitState::Open) => DependencyStatus::Down,
        (true, CircuitState::HalfOpen) => DependencyStatus::Degraded,
        (true, CircuitState::Closed) => DependencyStatus::Up,
    }
}

#[derive(Clone)]
pub struct HealthAggregator {
    dispatcher: Arc<Dispatcher>,
    artworks: Arc<dyn ArtworkStore>,
    ledger: Arc<JobLedger>,
    probe_timeout: Duration,
}

impl HealthAggregator {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        artworks: Arc<dyn ArtworkStore>,
        ledger: Arc<JobLedger>,
    ) -> Self {
        Self {
            dispatcher,
            artworks,
            ledger,
            probe_timeout: Duration::from_secs(2),
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub async fn check(&self) -> HealthReport {
        let (processor, artworks, jobs) = tokio::join!(
            self.dispatcher.probe(self.probe_timeout),
            timed(with_store_timeout(self.probe_timeout, self.artworks.ping())),
            timed(with_store_timeout(self.probe_timeout, self.ledger.ping())),
        );

        let processor = DependencyHealth {
            status: processor_status(processor.reachable, processor.breaker.state),
            latency_ms: processor.latency_ms,
            error: processor.error,
            breaker: Some(processor.breaker),
        };
        let artworks = store_health(artworks);
        let jobs = store_health(jobs);

        let status = overall_status(processor.status, artworks.status, jobs.status);
        if status != OverallStatus::Healthy {
            warn!(
                status = ?status,
                processor = ?processor.status,
                artwork_store = ?artworks.status,
                job_store = ?jobs.status,
                "Gateway not fully healthy"
            );
        }

        let mut dependencies = BTreeMap::new();
        dependencies.insert(PROCESSOR.to_string(), processor);
        dependencies.insert(ARTWORK_STORE.to_string(), artworks);
        dependencies.insert(JOB_STORE.to_string(), jobs);

        HealthReport {
            status,
            dependencies,
            checked_at: Utc::now(),
        }
    }
}

async fn timed<F>(fut: F) -> (Result<(), StoreError>, u64)
where
    F: std::future::Future<Output = Result<(), StoreError>>,
{
    let start = Instant::now();
    let result = fut.await;
    (result, start.elapsed().as_millis() as u64)
}

fn store_health((result, latency_ms): (Result<(), StoreError>, u64)) -> DependencyHealth {
    DependencyHealth {
        status: if result.is_ok() {
            DependencyStatus::Up
        } else {
            DependencyStatus::Down
        },
        latency_ms,
        error: result.err().map(|e| e.to_string()),
        breaker: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artwork::MemoryArtworkStore;
    use crate::breaker::BreakerConfig;
    use crate::job::MemoryJobStore;
    use crate::processor::{ProcessorFailure, ProcessorSubmission, ScriptedProcessor};
    use DependencyStatus::*;

    #[test]
    fn test_overall_status_table() {
        assert_eq!(overall_status(Up, Up, Up), OverallStatus::Healthy);
        assert_eq!(overall_status(Degraded, Up, Up), OverallStatus::Degraded);
        assert_eq!(overall_status(Down, Up, Up), OverallStatus::Degraded);
        assert_eq!(overall_status(Up, Down, Up), OverallStatus::Unhealthy);
        assert_eq!(overall_status(Up, Up, Down), OverallStatus::Unhealthy);
        assert_eq!(overall_status(Down, Down, Down), OverallStatus::Unhealthy);
    }

    #[test]
    fn test_processor_status() {
        assert_eq!(processor_status(true, CircuitState::Closed), Up);
        assert_eq!(processor_status(true, CircuitState::HalfOpen), Degraded);
        assert_eq!(processor_status(true, CircuitState::Open), Down);
        assert_eq!(processor_status(false, CircuitState::Closed), Down);
    }

    struct Fixture {
        processor: Arc<ScriptedProcessor>,
        dispatcher: Arc<Dispatcher>,
        artworks: Arc<MemoryArtworkStore>,
        jobs: Arc<MemoryJobStore>,
        aggregator: HealthAggregator,
    }

    fn fixture() -> Fixture {
        let processor = Arc::new(ScriptedProcessor::new());
        let dispatcher = Arc::new(Dispatcher::new(
            processor.clone(),
            BreakerConfig::default().with_failure_threshold(1),
        ));
        let artworks = Arc::new(MemoryArtworkStore::new());
        let jobs = Arc::new(MemoryJobStore::new());
        let ledger = Arc::new(JobLedger::new(jobs.clone()));
        let aggregator = HealthAggregator::new(dispatcher.clone(), artworks.clone(), ledger);
        Fixture {
            processor,
            dispatcher,
            artworks,
            jobs,
            aggregator,
        }
    }

    #[tokio::test]
    async fn test_all_up_is_healthy() {
        let f = fixture();
        let report = f.aggregator.check().await;
        assert_eq!(report.status, OverallStatus::Healthy);
        assert!(report.is_ready());
        assert_eq!(report.dependencies.len(), 3);
    }

    #[tokio::test]
    async fn test_processor_down_is_degraded_but_ready() {
        let f = fixture();
        f.processor.set_probe_ok(false);
        let report = f.aggregator.check().await;
        assert_eq!(report.status, OverallStatus::Degraded);
        assert!(report.is_ready());
        assert_eq!(report.dependencies[PROCESSOR].status, Down);
    }

    #[tokio::test]
    async fn test_open_breaker_marks_processor_down() {
        let f = fixture();
        f.processor.set_fallback(Some(ProcessorFailure::Connect("refused".into())));
        let _ = f
            .dispatcher
            .dispatch(ProcessorSubmission {
                job_id: "j".into(),
                callback_url: String::new(),
                artist: String::new(),
                title: String::new(),
                metadata: serde_json::Value::Null,
                content_type: "image/png".into(),
                image: String::new(),
                hashes: Default::default(),
            })
            .await;

        let report = f.aggregator.check().await;
        let processor = &report.dependencies[PROCESSOR];
        assert_eq!(processor.status, Down);
        assert_eq!(
            processor.breaker.as_ref().unwrap().state,
            CircuitState::Open
        );
        assert_eq!(report.status, OverallStatus::Degraded);
    }

    #[tokio::test]
    async fn test_store_outage_is_unhealthy() {
        let f = fixture();
        f.artworks.set_available(false);
        let report = f.aggregator.check().await;
        assert_eq!(report.status, OverallStatus::Unhealthy);
        assert!(!report.is_ready());
        assert!(report.dependencies[ARTWORK_STORE].error.is_some());

        f.artworks.set_available(true);
        f.jobs.set_available(false);
        let report = f.aggregator.check().await;
        assert_eq!(report.status, OverallStatus::Unhealthy);
    }
}
