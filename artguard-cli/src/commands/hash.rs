//! Hash command implementation.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use colored::Colorize;
use tracing::info;

use artguard_core::{HashComputer, ImageHashes};

use super::print_json;
use crate::OutputFormat;

/// Read an image and compute every locally supported hash family.
pub async fn hash_file(file: &Path) -> Result<ImageHashes> {
    let content =
        std::fs::read(file).with_context(|| format!("Failed to read file: {}", file.display()))?;

    info!(path = %file.display(), bytes = content.len(), "Read file");

    if !HashComputer::is_supported_format(&content) {
        bail!("Unsupported image format: {}", file.display());
    }

    let hashes = tokio::task::spawn_blocking(move || HashComputer::default().hash_bytes(&content))
        .await
        .context("Hashing task failed")??;
    Ok(hashes)
}

/// Execute the hash command.
pub async fn execute(file: PathBuf, output: OutputFormat) -> Result<()> {
    let hashes = hash_file(&file).await?;

    if output == OutputFormat::Json {
        print_json(&serde_json::to_value(&hashes)?);
        return Ok(());
    }

    println!("{}", file.display().to_string().bold());
    for (family, value) in hashes.iter() {
        println!(
            "   {} {}",
            format!("{:<11}", format!("{}:", family)).dimmed(),
            value.to_hex()
        );
    }
    Ok(())
}
