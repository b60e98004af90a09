use thiserror::Error;

/// Errors raised while building or comparing hash values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    #[error("Value needs {bits} bits but the width is {width}")]
    WidthExceeded { bits: u32, width: u32 },

    #[error("Invalid bit width: {0} (must be a positive multiple of 8)")]
    InvalidWidth(u32),

    #[error("Invalid hex string: {0}")]
    InvalidHex(String),

    #[error("Unknown hash family: {0}")]
    UnknownFamily(String),

    #[error("Hash computation failed: {0}")]
    Compute(String),
}

/// Failure talking to one of the external stores (artwork store or job store).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store call timed out after {0}ms")]
    Timeout(u64),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Run a store future under a bounded timeout.
pub async fn with_store_timeout<T, F>(timeout: std::time::Duration, fut: F) -> Result<T, StoreError>
where
    F: std::future::Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| StoreError::Timeout(timeout.as_millis() as u64))?
}
