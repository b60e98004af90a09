//! API error handling module
//!
//! Maps every core failure onto one HTTP error type. Clients can tell
//! "try again later" (503) from "rejected" (4xx) from "server fault" (5xx)
//! by status alone; the `code` field narrows it further.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use artguard_core::{
    CallbackError, DispatchError, HashError, LedgerError, SearchError, SubmissionError,
};

/// API error type with structured variants for different error categories
#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad request - client provided invalid input
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Unauthorized - missing or invalid callback credentials
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Not found - requested job does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict - a client-initiated action raced another state change
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Processor breaker is open; nothing was sent
    #[error("Processor unavailable, retry after {retry_after_secs}s")]
    CircuitOpen { retry_after_secs: u64 },

    /// Service unavailable - a store could not be reached
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Processor answered with an error
    #[error("Upstream error: {0}")]
    UpstreamError(String),

    /// Processor did not answer in time
    #[error("Upstream timeout: {0}")]
    UpstreamTimeout(String),

    /// Internal server error - unexpected server-side failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Create a bad request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Create an unauthorized error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create an internal server error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a service unavailable error
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable(message.into())
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::CircuitOpen { .. } | Self::ServiceUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::UpstreamError(_) => StatusCode::BAD_GATEWAY,
            Self::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "INVALID_INPUT",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::CircuitOpen { .. } => "CIRCUIT_OPEN",
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Self::UpstreamError(_) => "UPSTREAM_ERROR",
            Self::UpstreamTimeout(_) => "UPSTREAM_TIMEOUT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get sanitized error message for client response
    fn client_message(&self) -> String {
        match self {
            // Store and processor details stay in the logs
            Self::ServiceUnavailable(_) => "A required dependency is unavailable".to_string(),
            Self::UpstreamError(_) => "Processor rejected the submission".to_string(),
            Self::UpstreamTimeout(_) => "Processor did not respond in time".to_string(),
            Self::Internal(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Get the error category for logging
    fn error_category(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::UpstreamError(_) | Self::UpstreamTimeout(_) => "upstream",
            Self::Internal(_) => "internal",
        }
    }

    fn retry_after(&self) -> Option<u64> {
        match self {
            Self::CircuitOpen { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let category = self.error_category();
        let code = self.error_code();
        let internal_message = self.to_string();
        let client_message = self.client_message();

        // Log based on severity, always including internal details
        match &self {
            Self::BadRequest(_) | Self::NotFound(_) | Self::Conflict(_) => {
                tracing::warn!(
                    status = %status,
                    category = category,
                    code = code,
                    error = %internal_message,
                    "Client error"
                );
            }
            Self::Unauthorized(_) => {
                tracing::warn!(
                    status = %status,
                    category = category,
                    code = code,
                    error = %internal_message,
                    "Authentication error"
                );
            }
            Self::CircuitOpen { .. } | Self::ServiceUnavailable(_) => {
                tracing::warn!(
                    status = %status,
                    category = category,
                    code = code,
                    error = %internal_message,
                    "Service unavailable"
                );
            }
            Self::UpstreamError(_) | Self::UpstreamTimeout(_) | Self::Internal(_) => {
                tracing::error!(
                    status = %status,
                    category = category,
                    code = code,
                    error = %internal_message,
                    "Server error"
                );
            }
        }

        let retry_after = self.retry_after();

        // All error responses include a `code` field for programmatic error handling
        let body = serde_json::json!({
            "error": client_message,
            "code": code,
        });

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<HashError> for ApiError {
    fn from(e: HashError) -> Self {
        match e {
            HashError::Compute(msg) => Self::BadRequest(format!("Could not hash image: {msg}")),
            other => Self::BadRequest(other.to_string()),
        }
    }
}

impl From<SearchError> for ApiError {
    fn from(e: SearchError) -> Self {
        match e {
            SearchError::InvalidQuery(msg) => Self::BadRequest(msg),
            SearchError::DependencyUnavailable(msg) => Self::ServiceUnavailable(msg),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::NotFound(id) => Self::NotFound(format!("Job {id}")),
            LedgerError::AlreadyExists(_) | LedgerError::InvalidTransition { .. } => {
                Self::Conflict(e.to_string())
            }
            LedgerError::InvalidTarget(_) => Self::Internal(e.to_string()),
            LedgerError::DependencyUnavailable(msg) => Self::ServiceUnavailable(msg),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::CircuitOpen { retry_after } => Self::CircuitOpen {
                retry_after_secs: retry_after.as_secs().max(1),
            },
            DispatchError::UpstreamError { .. } => Self::UpstreamError(e.to_string()),
            DispatchError::UpstreamTimeout { .. } => Self::UpstreamTimeout(e.to_string()),
        }
    }
}

impl From<CallbackError> for ApiError {
    fn from(e: CallbackError) -> Self {
        match e {
            CallbackError::Unauthorized => Self::Unauthorized("Invalid callback token".into()),
            CallbackError::NotFound(id) => Self::NotFound(format!("Job {id}")),
            CallbackError::InvalidStatus(_) => Self::BadRequest(e.to_string()),
            CallbackError::DependencyUnavailable(msg) => Self::ServiceUnavailable(msg),
        }
    }
}

impl From<SubmissionError> for ApiError {
    fn from(e: SubmissionError) -> Self {
        match e {
            SubmissionError::Validation(msg) => Self::BadRequest(msg),
            SubmissionError::Search(e) => e.into(),
            SubmissionError::Ledger(e) => e.into(),
            SubmissionError::Dispatch { error, .. } => error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_taxonomy_status_codes() {
        assert_eq!(
            ApiError::from(SearchError::InvalidQuery("no hashes".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(SearchError::DependencyUnavailable("down".into())).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(LedgerError::NotFound("j".into())).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(CallbackError::Unauthorized).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(DispatchError::UpstreamError {
                status: Some(500),
                message: "boom".into()
            })
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::from(DispatchError::UpstreamTimeout { timeout_ms: 10 }).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_client_initiated_conflict_is_409() {
        let err = ApiError::from(LedgerError::InvalidTransition {
            job_id: "j".into(),
            current: artguard_core::JobStatus::Completed,
        });
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_circuit_open_sets_retry_after() {
        let err = ApiError::from(SubmissionError::Dispatch {
            job_id: None,
            error: DispatchError::CircuitOpen {
                retry_after: Duration::from_millis(12_400),
            },
        });
        assert_eq!(err.error_code(), "CIRCUIT_OPEN");

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "12");
    }

    #[test]
    fn test_internal_details_are_not_leaked() {
        let err = ApiError::service_unavailable("redis://secret-host:6379 refused");
        assert!(!err.client_message().contains("secret-host"));
    }
}
