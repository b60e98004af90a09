//! Artguard Core - ingress logic for an image-protection pipeline
//!
//! This crate decides whether an uploaded image is new work, hands new work
//! to an external processor, and tracks the resulting job until the
//! processor reports back.
//!
//! # Features
//!
//! - Multi-family perceptual hash comparison with weighted scoring
//! - Bounded similarity search over a read-only artwork store
//! - Circuit-breaker guarded dispatch with hard timeouts and no retries
//! - Job ledger built on an atomic compare-and-set store primitive
//! - Authenticated, idempotent processor callbacks
//! - Health aggregation that reflects breaker state
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use artguard_core::{
//!     HashFamily, ImageHashes, MemoryArtworkStore, SimilarityEngine, SimilarityQuery,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = SimilarityEngine::new(Arc::new(MemoryArtworkStore::new()));
//!
//! let hashes = ImageHashes::new()
//!     .with_hex(HashFamily::Average, "ffffffff00000000")?
//!     .with_hex(HashFamily::Difference, "0f0f0f0f0f0f0f0f")?;
//!
//! for result in engine.find_similar(SimilarityQuery::new(hashes)).await? {
//!     println!("{} ({:.3})", result.artwork.title, result.score);
//! }
//! # Ok(())
//! # }
//! ```

pub mod artwork;
pub mod breaker;
pub mod callback;
pub mod error;
pub mod hash;
pub mod health;
pub mod job;
pub mod processor;
pub mod similarity;
pub mod submission;

// Re-export main types for convenience
pub use artwork::{ArtworkRecord, ArtworkStore, CandidateFilter, MemoryArtworkStore};
pub use breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use callback::{CallbackAck, CallbackError, CallbackHandler, CallbackReport};
pub use error::{HashError, StoreError};
pub use hash::{
    hamming_distance, hamming_distance_bytes, similarity, weighted_score, HashFamily, HashValue,
    ImageHashes,
};
pub use health::{DependencyHealth, DependencyStatus, HealthAggregator, HealthReport, OverallStatus};
pub use job::{
    CasOutcome, Job, JobLedger, JobMetadata, JobStatus, JobStore, JobUpdate, LedgerError,
    MemoryJobStore, TransitionPayload,
};
pub use processor::{
    DispatchError, Dispatched, Dispatcher, ProcessorAck, ProcessorClient, ProcessorFailure,
    ProcessorSubmission, Scripted, ScriptedProcessor,
};
pub use similarity::{
    ArtworkRef, BatchOutcome, BatchSlot, FamilyWeights, SearchError, SimilarityEngine,
    SimilarityQuery, SimilarityResult,
};
pub use submission::{Submission, SubmissionError, SubmissionOutcome, SubmissionService};

#[cfg(feature = "network")]
pub use processor::{HttpProcessorClient, ProcessorHttpConfig};

#[cfg(feature = "perceptual-hash")]
pub use hash::HashComputer;
