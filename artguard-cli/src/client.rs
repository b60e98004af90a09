//! Thin HTTP client for the gateway API.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
}

impl GatewayClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get(&self, path: &str) -> Result<(StatusCode, Value)> {
        let url = self.url(path);
        debug!(%url, "GET");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Gateway unreachable at {}", self.base_url))?;
        read_body(response).await
    }

    pub async fn post_multipart(
        &self,
        path: &str,
        form: reqwest::multipart::Form,
    ) -> Result<(StatusCode, Value)> {
        let url = self.url(path);
        debug!(%url, "POST multipart");
        let response = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("Gateway unreachable at {}", self.base_url))?;
        read_body(response).await
    }
}

async fn read_body(response: reqwest::Response) -> Result<(StatusCode, Value)> {
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .context("Failed to read gateway response")?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    Ok((status, body))
}

/// Turn a non-success gateway response into an error whose wording drives
/// the exit code.
pub fn ensure_success(status: StatusCode, body: Value) -> Result<Value> {
    if status.is_success() {
        return Ok(body);
    }

    let detail = match (body.get("error"), body.get("code")) {
        (Some(error), Some(code)) => format!(
            "{} [{}]",
            error.as_str().unwrap_or_default(),
            code.as_str().unwrap_or_default()
        ),
        _ => body.to_string(),
    };

    match status {
        StatusCode::NOT_FOUND => bail!("Not found ({}): {}", status, detail),
        StatusCode::SERVICE_UNAVAILABLE => bail!("Gateway unavailable ({}): {}", status, detail),
        s if s.is_client_error() => bail!("Gateway rejected the request ({}): {}", s, detail),
        s => bail!("Gateway error ({}): {}", s, detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_url_joins_without_double_slash() {
        let client = GatewayClient::new("http://localhost:3000/").unwrap();
        assert_eq!(client.url("/health"), "http://localhost:3000/health");
    }

    #[test]
    fn test_ensure_success_wording() {
        let body = json!({"error": "artist is required", "code": "INVALID_INPUT"});
        let err = ensure_success(StatusCode::BAD_REQUEST, body).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("rejected"));
        assert!(msg.contains("INVALID_INPUT"));

        let err = ensure_success(StatusCode::SERVICE_UNAVAILABLE, json!({})).unwrap_err();
        assert!(err.to_string().contains("unavailable"));

        let ok = ensure_success(StatusCode::ACCEPTED, json!({"jobId": "j"})).unwrap();
        assert_eq!(ok["jobId"], "j");
    }
}
