//! Submit command implementation.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use colored::Colorize;
use reqwest::{multipart, StatusCode};
use serde_json::Value;
use tracing::info;

use super::{hash::hash_file, print_field, print_json};
use crate::client::{ensure_success, GatewayClient};
use crate::OutputFormat;

pub struct SubmitArgs {
    pub file: PathBuf,
    pub artist: String,
    pub title: String,
    pub metadata: Option<String>,
    pub precompute: bool,
}

/// Guess the upload content type from the file extension.
fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|s| s.to_lowercase())
        .as_deref()
    {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

fn parse_metadata(raw: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(raw).context("Invalid metadata JSON")?;
    if !value.is_object() {
        bail!("Invalid metadata: expected a JSON object");
    }
    Ok(value)
}

/// Execute the submit command.
pub async fn execute(gateway: &str, args: SubmitArgs, output: OutputFormat) -> Result<()> {
    let metadata = args.metadata.as_deref().map(parse_metadata).transpose()?;

    let content = std::fs::read(&args.file)
        .with_context(|| format!("Failed to read file: {}", args.file.display()))?;
    info!(path = %args.file.display(), bytes = content.len(), "Read file");

    let file_name = args
        .file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string();

    let part = multipart::Part::bytes(content)
        .file_name(file_name)
        .mime_str(content_type_for(&args.file))
        .context("Invalid content type")?;

    let mut form = multipart::Form::new()
        .part("file", part)
        .text("artist", args.artist)
        .text("title", args.title);

    if let Some(metadata) = metadata {
        form = form.text("metadata", metadata.to_string());
    }
    if args.precompute {
        let hashes = hash_file(&args.file).await?;
        form = form.text("hashes", serde_json::to_string(&hashes)?);
    }

    let client = GatewayClient::new(gateway)?;
    let (status, body) = client.post_multipart("/api/v1/submissions", form).await?;
    let body = ensure_success(status, body)?;

    if output == OutputFormat::Json {
        print_json(&body);
        return Ok(());
    }

    println!();
    if status == StatusCode::ACCEPTED {
        println!("{}", "Submission queued".green().bold());
        print_field("Job ID", body.get("jobId"));
        println!(
            "   {} artguard status {} --wait",
            "Track with:".dimmed(),
            body["jobId"].as_str().unwrap_or_default()
        );
    } else {
        println!("{}", "Artwork already on record".yellow().bold());
        print_field("Job ID", body.get("jobId"));
        let matched = &body["artwork"];
        print_field("Title", matched["artwork"].get("title"));
        print_field("Artist", matched["artwork"].get("artist"));
        print_field("Score", matched.get("score"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for(Path::new("a.PNG")), "image/png");
        assert_eq!(content_type_for(Path::new("a.jpeg")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("a")), "application/octet-stream");
    }

    #[test]
    fn test_parse_metadata() {
        assert!(parse_metadata(r#"{"series": "night"}"#).is_ok());
        assert!(parse_metadata("[1]").is_err());
        assert!(parse_metadata("{").is_err());
    }
}
