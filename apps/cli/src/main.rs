//! pauseget CLI - pausable, resumable downloads
//!
//! Fetches one URL to a local file. Ctrl-C pauses the transfer; it can be
//! resumed in the same session or later with `--continue`.

mod commands;
mod output;
mod progress;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pauseget_core::TransferConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// pauseget - pausable, resumable downloader
#[derive(Parser)]
#[command(name = "pauseget")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// JSON transfer configuration file
    #[arg(long, env = "PAUSEGET_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "human", global = true)]
    format: OutputFormat,

    /// Connection timeout in seconds
    #[arg(long, global = true)]
    connect_timeout: Option<u64>,

    /// Abort an attempt after this many seconds without data
    #[arg(long, global = true)]
    stall_timeout: Option<u64>,

    /// Accept invalid TLS certificates
    #[arg(long, global = true)]
    insecure: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a URL to a file
    Get {
        /// URL to download (https:// is assumed when no scheme is given)
        url: String,

        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Continue from an existing partial file
        #[arg(short = 'c', long = "continue")]
        resume: bool,

        /// Never ask to resume or retry; exit instead
        #[arg(long)]
        no_prompt: bool,
    },

    /// Probe URLs for size and range support
    Probe {
        /// URLs to probe
        urls: Vec<String>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Get {
            url,
            output,
            resume,
            no_prompt,
        } => {
            let options = commands::GetOptions {
                url,
                output,
                resume,
                prompt: !no_prompt,
            };
            commands::get(options, config, cli.format).await?
        }

        Commands::Probe { urls } => commands::probe_urls(urls, &config, cli.format).await?,

        Commands::Completions { shell } => {
            use clap::CommandFactory;
            clap_complete::generate(shell, &mut Cli::command(), "pauseget", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Log to stderr so the progress bar on stdout stays intact
fn init_logging(verbose: bool) {
    let default = if verbose {
        "pauseget=debug,pauseget_core=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Config file first, then flags on top
fn load_config(cli: &Cli) -> Result<TransferConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("invalid config {}", path.display()))?
        }
        None => TransferConfig::default(),
    };

    if let Some(secs) = cli.connect_timeout {
        config.connect_timeout_ms = secs.saturating_mul(1000);
    }
    if let Some(secs) = cli.stall_timeout {
        config.stall_timeout_ms = secs.saturating_mul(1000);
    }
    if cli.insecure {
        config.accept_invalid_certs = true;
    }

    Ok(config)
}
