//! Outbound calls to the processing backend.
//!
//! Supports multiple transports:
//! - HTTP processor (production)
//! - Scripted processor (testing only)
//!
//! All calls go through the [`Dispatcher`], which wraps them in the circuit
//! breaker and a hard timeout. There are no retries: a failed submission is
//! reported to the caller, who decides whether to resubmit.

pub mod dispatcher;
#[cfg(feature = "network")]
pub mod http_client;
pub mod mock;

pub use dispatcher::{DispatchError, Dispatched, Dispatcher, ProbeReport};
#[cfg(feature = "network")]
pub use http_client::{HttpProcessorClient, ProcessorHttpConfig};
pub use mock::{Scripted, ScriptedProcessor};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hash::ImageHashes;

/// Work order sent to the processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorSubmission {
    /// Gateway job id; the processor echoes it in callbacks
    pub job_id: String,
    pub callback_url: String,
    pub artist: String,
    pub title: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub content_type: String,
    /// Base64-encoded image bytes
    pub image: String,
    #[serde(default)]
    pub hashes: ImageHashes,
}

/// Processor acknowledgement of an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorAck {
    pub job_id: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Raw transport-level failure from a processor client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessorFailure {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Processor returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid processor response: {0}")]
    InvalidResponse(String),
}

impl ProcessorFailure {
    /// Whether the processor itself answered. A malformed body still proves
    /// the processor is up, so it does not count against the breaker.
    pub fn processor_responded(&self) -> bool {
        matches!(self, Self::InvalidResponse(_))
    }
}

/// Transport to the processor.
#[async_trait]
pub trait ProcessorClient: Send + Sync {
    async fn submit(
        &self,
        submission: &ProcessorSubmission,
    ) -> Result<ProcessorAck, ProcessorFailure>;

    /// Lightweight health probe.
    async fn probe(&self) -> Result<(), ProcessorFailure>;

    fn name(&self) -> &'static str;
}
