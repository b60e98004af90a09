//! Health command implementation.

use anyhow::{bail, Result};
use colored::Colorize;
use reqwest::StatusCode;

use super::{colored_status, print_json};
use crate::client::GatewayClient;
use crate::OutputFormat;

/// Execute the health command.
///
/// A 503 from the gateway still carries the per-dependency report, so it is
/// printed before the command fails.
pub async fn execute(gateway: &str, output: OutputFormat) -> Result<()> {
    let client = GatewayClient::new(gateway)?;
    let (code, report) = client.get("/health").await?;

    if output == OutputFormat::Json {
        print_json(&report);
    } else {
        let status = report["status"].as_str().unwrap_or("unknown");
        println!();
        println!("   {} {}", "Gateway:".dimmed(), colored_status(status));
        if let Some(version) = report["version"].as_str() {
            println!("   {} {}", "Version:".dimmed(), version);
        }

        if let Some(deps) = report["dependencies"].as_object() {
            for (name, dep) in deps {
                let dep_status = dep["status"].as_str().unwrap_or("unknown");
                let mut line = format!(
                    "   {} {}",
                    format!("{}:", name).dimmed(),
                    colored_status(dep_status)
                );
                if let Some(ms) = dep["latencyMs"].as_u64() {
                    line.push_str(&format!(" ({} ms)", ms));
                }
                if let Some(breaker) = dep["breaker"]["state"].as_str() {
                    line.push_str(&format!(" breaker {}", colored_status(breaker)));
                }
                println!("{}", line);
            }
        }
    }

    if code == StatusCode::SERVICE_UNAVAILABLE {
        bail!("Gateway unhealthy");
    }
    if !code.is_success() {
        bail!("Gateway error ({})", code);
    }
    Ok(())
}
