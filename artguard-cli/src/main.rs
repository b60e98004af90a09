//! Artguard CLI - operator tool for the artguard ingress gateway.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

mod client;
mod commands;
mod exit_codes;

use exit_codes::ExitCode;

const EXIT_CODES_HELP: &str = "\
Exit codes:
  0   Success
  1   General error
  65  Input rejected (malformed hash, gateway validation error)
  66  Cannot read input file
  69  Gateway unreachable, unhealthy or circuit open";

#[derive(Parser)]
#[command(name = "artguard")]
#[command(author, version, about = "Artwork duplicate detection and protection gateway tool", long_about = None)]
#[command(after_help = EXIT_CODES_HELP)]
struct Cli {
    /// Print machine-readable JSON instead of text
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare two hex hash values of the same family
    Compare {
        /// First hash (hex)
        #[arg(value_name = "HASH_A")]
        a: String,

        /// Second hash (hex)
        #[arg(value_name = "HASH_B")]
        b: String,

        /// Hash family both values belong to
        #[arg(short, long, default_value = "perceptual")]
        family: String,

        /// Report whether the similarity reaches this threshold
        #[arg(short, long)]
        threshold: Option<f64>,
    },

    /// Compute perceptual hashes for a local image
    Hash {
        /// Path to the image
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Submit an image to a running gateway
    Submit {
        /// Path to the image
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[arg(long)]
        artist: String,

        #[arg(long)]
        title: String,

        /// Extra metadata as a JSON object
        #[arg(long)]
        metadata: Option<String>,

        /// Hash locally and send the hashes with the image
        #[arg(long)]
        precompute: bool,

        /// Gateway base URL
        #[arg(long, env = "ARTGUARD_URL", default_value = "http://localhost:3000")]
        gateway: String,
    },

    /// Show the state of a job
    Status {
        #[arg(value_name = "JOB_ID")]
        job_id: String,

        /// Poll until the job completes or fails
        #[arg(long)]
        wait: bool,

        /// Seconds between polls with --wait
        #[arg(long, default_value_t = 2)]
        interval: u64,

        /// Gateway base URL
        #[arg(long, env = "ARTGUARD_URL", default_value = "http://localhost:3000")]
        gateway: String,
    },

    /// Show gateway and dependency health
    Health {
        /// Gateway base URL
        #[arg(long, env = "ARTGUARD_URL", default_value = "http://localhost:3000")]
        gateway: String,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let output = cli.output;
    match cli.command {
        Commands::Compare {
            a,
            b,
            family,
            threshold,
        } => commands::compare::execute(&a, &b, &family, threshold, output),
        Commands::Hash { file } => commands::hash::execute(file, output).await,
        Commands::Submit {
            file,
            artist,
            title,
            metadata,
            precompute,
            gateway,
        } => {
            let request = commands::submit::SubmitArgs {
                file,
                artist,
                title,
                metadata,
                precompute,
            };
            commands::submit::execute(&gateway, request, output).await
        }
        Commands::Status {
            job_id,
            wait,
            interval,
            gateway,
        } => {
            let poll = wait.then(|| Duration::from_secs(interval.max(1)));
            commands::status::execute(&gateway, &job_id, poll, output).await
        }
        Commands::Health { gateway } => commands::health::execute(&gateway, output).await,
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let exit = match run(cli).await {
        Ok(()) => ExitCode::success(),
        Err(err) => ExitCode::from_anyhow(&err),
    };

    if let Some(message) = &exit.message {
        eprintln!("{} {}", "error:".red().bold(), message);
    }
    std::process::exit(exit.code);
}
