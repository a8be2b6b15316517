//! CLI command implementations

use crate::output::{format_bytes, print_output};
use crate::progress::TransferProgress;
use crate::OutputFormat;
use anyhow::{bail, Result};
use console::style;
use dialoguer::Confirm;
use pauseget_core::{
    build_client, probe, AttemptOutcome, ProbeInfo, Transfer, TransferConfig, TransferEvent,
};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

// ============================================================================
// Get
// ============================================================================

pub struct GetOptions {
    pub url: String,
    pub output: Option<PathBuf>,
    /// Adopt an existing partial file as the resume offset
    pub resume: bool,
    /// Ask before resuming or retrying
    pub prompt: bool,
}

/// Final report of a `get`
#[derive(Debug, Serialize)]
struct TransferSummary {
    url: String,
    destination: PathBuf,
    success: bool,
    paused: bool,
    outcome: AttemptOutcome,
    bytes_on_disk: u64,
    total_size: Option<u64>,
}

impl fmt::Display for TransferSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self
            .total_size
            .map(format_bytes)
            .unwrap_or_else(|| "?".to_string());

        if self.success {
            write!(
                f,
                "{} Saved {} ({})",
                style("✓").green().bold(),
                style(self.destination.display()).cyan(),
                format_bytes(self.bytes_on_disk)
            )
        } else if self.paused {
            write!(
                f,
                "{} Paused at {} of {}. Run again with --continue to resume.",
                style("⏸").yellow(),
                format_bytes(self.bytes_on_disk),
                total
            )
        } else {
            write!(
                f,
                "{} Download {}: {} of {} kept in {}",
                style("✗").red().bold(),
                self.outcome,
                format_bytes(self.bytes_on_disk),
                total,
                self.destination.display()
            )
        }
    }
}

pub async fn get(options: GetOptions, config: TransferConfig, format: OutputFormat) -> Result<()> {
    let url = normalize_url(&options.url);
    let destination = options
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(default_file_name(&url)));
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| destination.display().to_string());

    let progress = TransferProgress::new(&name);
    let transfer = Transfer::with_config(&url, &destination, progress.sink(), config)?;

    if options.resume {
        let offset = transfer.adopt_partial_file().await?;
        if offset > 0 {
            progress.println(format!("Continuing from {}", format_bytes(offset)));
        }
    }

    let mut events = transfer.subscribe();
    transfer.start();

    let outcome = loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                if !transfer.request_pause() {
                    // Not streaming yet: stop before the attempt writes anything
                    transfer.shutdown().await;
                }
                continue;
            }
            event = events.recv() => event,
        };

        match event {
            Ok(TransferEvent::Progress { .. }) => {}
            Ok(TransferEvent::Paused { .. }) => progress.paused(),
            Ok(TransferEvent::Resumed { .. }) => progress.resumed(&name),
            Ok(TransferEvent::Finished {
                success: true,
                outcome,
                ..
            }) => {
                progress.completed();
                break outcome;
            }
            Ok(TransferEvent::Finished { outcome, .. }) => {
                // is_paused() tells an intentional stop apart from a failure
                if transfer.is_paused() {
                    progress.paused();
                    if options.prompt
                        && confirm(&progress, "Resume download?").await?
                        && transfer.resume_download()
                    {
                        continue;
                    }
                } else {
                    progress.failed(outcome);
                    let prompt = format!(
                        "Download {}. Retry from {}?",
                        outcome,
                        format_bytes(transfer.resume_offset())
                    );
                    if options.prompt && confirm(&progress, &prompt).await? && transfer.start() {
                        continue;
                    }
                }
                progress.abandon();
                break outcome;
            }
            Err(RecvError::Lagged(skipped)) => debug!("Skipped {} transfer events", skipped),
            Err(RecvError::Closed) => bail!("transfer event channel closed"),
        }
    };

    let bytes_on_disk = tokio::fs::metadata(&destination)
        .await
        .map(|m| m.len())
        .unwrap_or(0);
    let summary = TransferSummary {
        url,
        destination,
        success: outcome.is_success(),
        paused: transfer.is_paused(),
        outcome,
        bytes_on_disk,
        total_size: transfer.total_size(),
    };
    print_output(&summary, format)?;

    if !summary.success && !summary.paused {
        bail!("download {}", outcome);
    }
    Ok(())
}

async fn confirm(progress: &TransferProgress, prompt: &str) -> Result<bool> {
    let bar = progress.bar();
    let prompt = prompt.to_string();
    let answer = tokio::task::spawn_blocking(move || {
        bar.suspend(|| Confirm::new().with_prompt(prompt).default(true).interact())
    })
    .await??;
    Ok(answer)
}

// ============================================================================
// Probe
// ============================================================================

#[derive(Debug, Serialize)]
struct ProbeRow {
    url: String,
    info: Option<ProbeInfo>,
    error: Option<String>,
    retryable: bool,
}

pub async fn probe_urls(urls: Vec<String>, config: &TransferConfig, format: OutputFormat) -> Result<()> {
    let client = build_client(config)?;

    let mut rows = Vec::with_capacity(urls.len());
    for raw in urls {
        let url = normalize_url(&raw);
        let row = match url::Url::parse(&url) {
            Ok(parsed) => match probe(&client, &parsed).await {
                Ok(info) => ProbeRow {
                    url,
                    info: Some(info),
                    error: None,
                    retryable: false,
                },
                Err(e) => ProbeRow {
                    url,
                    info: None,
                    retryable: e.is_retryable(),
                    error: Some(e.to_string()),
                },
            },
            Err(e) => ProbeRow {
                url,
                info: None,
                error: Some(format!("Invalid URL: {e}")),
                retryable: false,
            },
        };
        rows.push(row);
    }

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        OutputFormat::Human => {
            for row in &rows {
                match (&row.info, &row.error) {
                    (Some(info), _) => {
                        println!("{} {}", style("✓").green(), row.url);
                        println!(
                            "    Size: {}",
                            info.size
                                .map(format_bytes)
                                .unwrap_or_else(|| "unknown".to_string())
                        );
                        if let Some(ref ct) = info.content_type {
                            println!("    Type: {}", ct);
                        }
                        println!(
                            "    Resumable: {}",
                            if info.resumable {
                                style("Yes").green()
                            } else {
                                style("No").yellow()
                            }
                        );
                    }
                    (None, error) => {
                        println!(
                            "{} {}: {}{}",
                            style("✗").red(),
                            row.url,
                            style(error.as_deref().unwrap_or("unknown error")).red(),
                            if row.retryable { " (retryable)" } else { "" }
                        );
                    }
                }
            }
        }
    }

    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Assume https when the user typed a bare host/path
pub fn normalize_url(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

/// File name for a URL when no output path is given
///
/// Uses the last path segment when it has an extension, otherwise guesses
/// from what the URL mentions.
pub fn default_file_name(url: &str) -> String {
    let last = url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|segments| segments.last().map(|s| s.to_string()))
        })
        .unwrap_or_default();
    if !last.is_empty() && last.contains('.') {
        return last;
    }

    let lower = url.to_ascii_lowercase();
    let guess = if lower.contains(".pdf") {
        "download.pdf"
    } else if lower.contains(".jpg") || lower.contains(".jpeg") {
        "download.jpg"
    } else if lower.contains(".png") {
        "download.png"
    } else {
        "download.html"
    };
    guess.to_string()
}
