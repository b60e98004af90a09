//! Application state module
//!
//! Wires the core services to their stores and shares them across handlers.

use std::sync::Arc;
use std::time::Duration;

use artguard_core::{
    ArtworkStore, BreakerConfig, CallbackHandler, Dispatcher, HealthAggregator,
    HttpProcessorClient, JobLedger, JobStore, MemoryArtworkStore, MemoryJobStore,
    ProcessorClient, ProcessorHttpConfig, SimilarityEngine, SubmissionService,
};
use thiserror::Error;

use crate::artwork_store::PostgresArtworkStore;
use crate::config::Config;
use crate::job_store::RedisJobStore;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Artwork store: {0}")]
    ArtworkStore(String),

    #[error("Job store: {0}")]
    JobStore(String),

    #[error("Processor client: {0}")]
    Processor(String),
}

/// Application state containing shared resources.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SimilarityEngine>,
    pub ledger: Arc<JobLedger>,
    pub dispatcher: Arc<Dispatcher>,
    pub submissions: Arc<SubmissionService>,
    pub callbacks: Arc<CallbackHandler>,
    pub health: Arc<HealthAggregator>,
    /// Maximum accepted image size in bytes
    pub max_file_size: usize,
}

impl AppState {
    /// Build state from already constructed stores and processor client.
    pub fn from_parts(
        artworks: Arc<dyn ArtworkStore>,
        jobs: Arc<dyn JobStore>,
        processor: Arc<dyn ProcessorClient>,
        config: &Config,
    ) -> Self {
        let store_timeout = config.store_timeout();

        let engine = Arc::new(
            SimilarityEngine::new(artworks.clone())
                .with_candidate_limit(config.similarity_candidate_limit)
                .with_store_timeout(store_timeout),
        );
        let ledger = Arc::new(
            JobLedger::new(jobs)
                .with_ttl(config.job_ttl())
                .with_store_timeout(store_timeout),
        );
        let dispatcher = Arc::new(
            Dispatcher::new(
                processor,
                BreakerConfig::default()
                    .with_failure_threshold(config.breaker_failure_threshold)
                    .with_cooldown(Duration::from_secs(config.breaker_cooldown_secs)),
            )
            .with_timeout(config.processor_timeout()),
        );
        let submissions = Arc::new(
            SubmissionService::new(
                engine.clone(),
                ledger.clone(),
                dispatcher.clone(),
                config.callback_url(),
            )
            .with_duplicate_threshold(config.duplicate_threshold),
        );
        let callbacks = Arc::new(CallbackHandler::new(
            ledger.clone(),
            config.callback_token.clone(),
        ));
        let health = Arc::new(
            HealthAggregator::new(dispatcher.clone(), artworks, ledger.clone())
                .with_probe_timeout(config.health_probe_timeout()),
        );

        Self {
            engine,
            ledger,
            dispatcher,
            submissions,
            callbacks,
            health,
            max_file_size: config.max_file_size(),
        }
    }

    /// Connect to the configured stores and processor.
    ///
    /// Unset store URLs fall back to in-memory stores, which only make sense
    /// for a single development instance.
    pub async fn connect(config: &Config) -> Result<Self, StartupError> {
        let artworks: Arc<dyn ArtworkStore> = match &config.database_url {
            Some(url) => Arc::new(
                PostgresArtworkStore::connect_lazy(url, config.database_max_connections)
                    .map_err(|e| StartupError::ArtworkStore(e.to_string()))?,
            ),
            None => {
                tracing::warn!("DATABASE_URL not set: using an empty in-memory artwork store");
                Arc::new(MemoryArtworkStore::new())
            }
        };

        let jobs: Arc<dyn JobStore> = match &config.redis_url {
            Some(url) => Arc::new(
                RedisJobStore::connect(url)
                    .await
                    .map_err(|e| StartupError::JobStore(e.to_string()))?,
            ),
            None => {
                tracing::warn!(
                    "REDIS_URL not set: using an in-memory job store (single instance only)"
                );
                Arc::new(MemoryJobStore::new())
            }
        };

        let processor_config = ProcessorHttpConfig {
            timeout: config.processor_timeout(),
            probe_timeout: config.health_probe_timeout(),
            api_key: config.processor_api_key.clone(),
            ..ProcessorHttpConfig::new(config.processor_url.clone())
        };
        let processor = Arc::new(
            HttpProcessorClient::new(processor_config)
                .map_err(|e| StartupError::Processor(e.to_string()))?,
        );

        tracing::info!(
            processor_url = %config.processor_url,
            callback_url = %config.callback_url(),
            "Processor client configured"
        );

        Ok(Self::from_parts(artworks, jobs, processor, config))
    }
}
