//! Exit codes following sysexits.h conventions.
//!
//! Scripts can tell a rejected input apart from an unreachable gateway
//! without parsing stderr.

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// General error (catch-all).
pub const GENERAL_ERROR: i32 = 1;

/// Input data was rejected (malformed hash, gateway validation error).
/// Maps to EX_DATAERR from sysexits.h.
pub const DATA_ERROR: i32 = 65;

/// Cannot open input file.
/// Maps to EX_NOINPUT from sysexits.h.
pub const INPUT_ERROR: i32 = 66;

/// Gateway unreachable, unhealthy or its processor circuit is open.
/// Maps to EX_UNAVAILABLE from sysexits.h.
pub const UNAVAILABLE: i32 = 69;

/// Represents an exit code with optional error context.
pub struct ExitCode {
    pub code: i32,
    pub message: Option<String>,
}

impl ExitCode {
    pub const fn success() -> Self {
        Self {
            code: SUCCESS,
            message: None,
        }
    }

    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");

        let transport_failure = err
            .chain()
            .any(|cause| cause.downcast_ref::<reqwest::Error>().is_some());

        let code = if transport_failure
            || message.contains("unavailable")
            || message.contains("unhealthy")
        {
            UNAVAILABLE
        } else if message.contains("Failed to read file") {
            INPUT_ERROR
        } else if message.contains("Invalid hash")
            || message.contains("Invalid metadata")
            || message.contains("Unknown hash family")
            || message.contains("Unsupported image")
            || message.contains("rejected")
        {
            DATA_ERROR
        } else {
            GENERAL_ERROR
        };

        Self::error(code, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Context};

    #[test]
    fn test_classifies_by_message() {
        let err = anyhow!("No such file").context("Failed to read file: a.png");
        assert_eq!(ExitCode::from_anyhow(&err).code, INPUT_ERROR);

        let err = anyhow!("Invalid hash for average: odd length");
        assert_eq!(ExitCode::from_anyhow(&err).code, DATA_ERROR);

        let err = anyhow!("Gateway rejected the request (400 Bad Request)");
        assert_eq!(ExitCode::from_anyhow(&err).code, DATA_ERROR);

        let err = anyhow!("Gateway unavailable (503 Service Unavailable)");
        assert_eq!(ExitCode::from_anyhow(&err).code, UNAVAILABLE);

        let err = anyhow!("something else");
        assert_eq!(ExitCode::from_anyhow(&err).code, GENERAL_ERROR);
    }

    #[test]
    fn test_success_has_no_message() {
        let ok = ExitCode::success();
        assert_eq!(ok.code, SUCCESS);
        assert!(ok.message.is_none());
    }
}
