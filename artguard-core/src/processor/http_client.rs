//! HTTP transport to the processing backend.
//!
//! Submissions are `POST {base_url}/jobs` with a JSON body; the probe is
//! `GET {base_url}/health`. Neither call is retried here.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument, warn};

use super::{ProcessorAck, ProcessorClient, ProcessorFailure, ProcessorSubmission};

/// Upper bound on how much of an error body is kept for diagnostics.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone)]
pub struct ProcessorHttpConfig {
    /// Base URL, e.g. `http://processor:8000`.
    pub base_url: String,
    /// Per-request timeout for submissions.
    pub timeout: Duration,
    /// Timeout for the health probe.
    pub probe_timeout: Duration,
    /// Optional bearer token presented to the processor.
    pub api_key: Option<String>,
}

impl ProcessorHttpConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(2),
            api_key: None,
        }
    }
}

pub struct HttpProcessorClient {
    client: Client,
    config: ProcessorHttpConfig,
}

impl HttpProcessorClient {
    pub fn new(config: ProcessorHttpConfig) -> Result<Self, ProcessorFailure> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProcessorFailure::Connect(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[async_trait]
impl ProcessorClient for HttpProcessorClient {
    #[instrument(skip_all, fields(job_id = %submission.job_id))]
    async fn submit(
        &self,
        submission: &ProcessorSubmission,
    ) -> Result<ProcessorAck, ProcessorFailure> {
        let start = Instant::now();
        let response = self
            .authorize(self.client.post(self.url("jobs")).json(submission))
            .send()
            .await
            .map_err(|e| {
                let latency_ms = start.elapsed().as_millis() as u64;
                warn!(error = %e, latency_ms, "Processor submission failed");
                map_transport_error(e)
            })?;

        let status = response.status();
        debug!(status = %status, "Received processor response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                status = %status,
                latency_ms = start.elapsed().as_millis() as u64,
                transient = is_transient_status(status),
                "Processor rejected submission"
            );
            return Err(ProcessorFailure::Status {
                status: status.as_u16(),
                message: truncate(&body),
            });
        }

        let ack: ProcessorAck = response.json().await.map_err(|e| {
            warn!(error = %e, "Failed to parse processor acknowledgement");
            ProcessorFailure::InvalidResponse(e.to_string())
        })?;

        debug!(
            latency_ms = start.elapsed().as_millis() as u64,
            processor_job_id = %ack.job_id,
            "Submission acknowledged"
        );
        Ok(ack)
    }

    async fn probe(&self) -> Result<(), ProcessorFailure> {
        let response = self
            .authorize(self.client.get(self.url("health")))
            .timeout(self.config.probe_timeout)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ProcessorFailure::Status {
                status: status.as_u16(),
                message: "health probe failed".to_string(),
            })
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

fn map_transport_error(e: reqwest::Error) -> ProcessorFailure {
    if e.is_timeout() {
        ProcessorFailure::Timeout
    } else {
        ProcessorFailure::Connect(e.to_string())
    }
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

/// Whether an upstream status suggests the processor is overloaded rather
/// than rejecting this particular request.
pub fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
            | StatusCode::BAD_GATEWAY
    )
}
