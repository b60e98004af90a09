//! Status command implementation.

use std::time::Duration;

use anyhow::{bail, Result};
use tracing::debug;

use super::print_job;
use crate::client::{ensure_success, GatewayClient};
use crate::OutputFormat;

fn is_terminal(status: &str) -> bool {
    matches!(status, "completed" | "failed")
}

/// Execute the status command.
///
/// With `poll` set, keeps polling until the job reaches a terminal state,
/// printing each status change, and fails if the job failed.
pub async fn execute(
    gateway: &str,
    job_id: &str,
    poll: Option<Duration>,
    output: OutputFormat,
) -> Result<()> {
    let client = GatewayClient::new(gateway)?;
    let path = format!("/api/v1/jobs/{}", job_id);
    let mut last_status = String::new();

    loop {
        let (code, body) = client.get(&path).await?;
        let job = ensure_success(code, body)?;
        let status = job["status"].as_str().unwrap_or("unknown").to_string();

        let Some(interval) = poll else {
            print_job(&job, output);
            return Ok(());
        };

        if status != last_status {
            print_job(&job, output);
            last_status = status.clone();
        }

        if is_terminal(&status) {
            if status == "failed" {
                bail!(
                    "Job {} failed: {}",
                    job_id,
                    job["error"].as_str().unwrap_or("no detail")
                );
            }
            return Ok(());
        }

        debug!(job_id, status = %status, "Waiting for job");
        tokio::time::sleep(interval).await;
    }
}
