//! CLI command implementations.

pub mod compare;
pub mod hash;
pub mod health;
pub mod status;
pub mod submit;

use colored::Colorize;
use serde_json::Value;

use crate::OutputFormat;

pub(crate) fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(_) => println!("{}", value),
    }
}

/// Print a labelled field when present.
pub(crate) fn print_field(label: &str, value: Option<&Value>) {
    let Some(value) = value else { return };
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Null => return,
        other => other.to_string(),
    };
    println!("   {} {}", format!("{}:", label).dimmed(), text);
}

pub(crate) fn colored_status(status: &str) -> colored::ColoredString {
    match status {
        "completed" | "healthy" | "up" | "closed" => status.green().bold(),
        "failed" | "unhealthy" | "down" | "open" => status.red().bold(),
        _ => status.yellow().bold(),
    }
}

pub(crate) fn print_job(job: &Value, output: OutputFormat) {
    if output == OutputFormat::Json {
        print_json(job);
        return;
    }

    let status = job["status"].as_str().unwrap_or("unknown");
    println!();
    println!("   {} {}", "Status:".dimmed(), colored_status(status));
    print_field("Job ID", job.get("jobId"));
    print_field("Artist", job.get("artist"));
    print_field("Title", job.get("title"));
    print_field("Processor job", job.get("processorJobId"));
    print_field("Result", job.get("result"));
    print_field("Error", job.get("error"));
    print_field("Updated", job.get("updatedAt"));
    print_field("Expires", job.get("expiresAt"));
}
