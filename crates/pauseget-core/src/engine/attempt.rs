//! Transfer attempt - one pass of the streaming loop
//!
//! An attempt opens the destination at the resume offset, issues the request
//! (with `Range: bytes=<offset>-` when resuming), streams the body to disk and
//! stops on end of stream, pause, stall or error. Everything the attempt needs
//! travels in an explicit [`AttemptContext`]; there is no shared global
//! transport handle, so independent transfers never interfere.

use crate::engine::outcome::{classify, AttemptStop};
use crate::engine::probe::content_range_total;
use crate::engine::progress::{ProgressSink, ProgressTracker};
use crate::error::TransferError;
use futures::StreamExt;
use pauseget_types::{AttemptOutcome, TransferEvent};
use reqwest::header::RANGE;
use reqwest::{Client, StatusCode};
use std::io::SeekFrom;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{broadcast, Notify};
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

/// Everything a single attempt reads or signals
pub(crate) struct AttemptContext<'a> {
    pub id: Uuid,
    pub url: &'a Url,
    pub destination: &'a Path,
    pub client: &'a Client,
    /// Bytes already durably written by earlier attempts
    pub resume_offset: u64,
    /// Size of the whole resource, 0 when unknown
    pub known_total: u64,
    pub stall_timeout: Duration,
    pub paused: &'a AtomicBool,
    pub running: &'a AtomicBool,
    /// Woken whenever `paused` is raised
    pub wake: &'a Notify,
    pub sink: &'a dyn ProgressSink,
    pub events: &'a broadcast::Sender<TransferEvent>,
}

/// What an attempt did to the destination
#[derive(Debug)]
pub(crate) struct AttemptReport {
    pub outcome: AttemptOutcome,
    /// Offset the attempt actually started writing at
    pub start_offset: u64,
    /// Destination length after the attempt
    pub end_offset: u64,
    pub written: u64,
    /// Resource size learned from this attempt's response headers
    pub discovered_total: Option<u64>,
    pub error: Option<String>,
}

/// Mutable bookkeeping of the attempt in progress
#[derive(Debug, Default)]
struct Session {
    start: u64,
    written: u64,
    discovered_total: Option<u64>,
}

impl AttemptContext<'_> {
    /// Run the attempt to completion. Never fails: every problem becomes an
    /// outcome in the returned report.
    pub async fn run(self) -> AttemptReport {
        let (mut file, start) = match open_destination(self.destination, self.resume_offset).await
        {
            Ok(opened) => opened,
            Err(e) => {
                error!(
                    "Cannot open destination {}: {}",
                    self.destination.display(),
                    e
                );
                let error = e.to_string();
                return AttemptReport {
                    outcome: classify(&AttemptStop::Setup(e), 0, false),
                    start_offset: self.resume_offset,
                    end_offset: self.resume_offset,
                    written: 0,
                    discovered_total: None,
                    error: Some(error),
                };
            }
        };

        if start != self.resume_offset {
            warn!(
                "Transfer {}: resume offset {} reconciled to on-disk length {}",
                self.id, self.resume_offset, start
            );
        }

        let mut session = Session {
            start,
            ..Session::default()
        };

        self.running.store(true, Ordering::Release);
        let mut stop = self.stream(&mut file, &mut session).await;
        self.running.store(false, Ordering::Release);

        // Close the handle cleanly before measuring what is on disk
        let synced = sync_and_measure(&mut file).await;
        drop(file);

        let end_offset = match synced {
            Ok(len) => len,
            Err(e) => {
                warn!("Transfer {}: failed to sync destination: {}", self.id, e);
                if matches!(stop, AttemptStop::Complete) {
                    stop = AttemptStop::Failed(e.into());
                }
                session.start + session.written
            }
        };

        let total = session
            .discovered_total
            .or((self.known_total > 0).then_some(self.known_total));
        let short = total.map_or(false, |total| end_offset < total);
        let outcome = classify(&stop, session.written, short);

        let error = match &stop {
            AttemptStop::Failed(e) => Some(e.to_string()),
            AttemptStop::Stalled(ms) => Some(TransferError::Stalled(*ms).to_string()),
            AttemptStop::Complete if short => Some(format!(
                "stream ended at byte {} of {}",
                end_offset,
                total.unwrap_or_default()
            )),
            _ => None,
        };

        info!(
            "Transfer {} attempt stopped: {} ({} bytes written, file at {})",
            self.id, outcome, session.written, end_offset
        );

        AttemptReport {
            outcome,
            start_offset: session.start,
            end_offset,
            written: session.written,
            discovered_total: session.discovered_total,
            error,
        }
    }

    /// Issue the request and stream the body into `file`
    async fn stream(&self, file: &mut File, session: &mut Session) -> AttemptStop {
        let pause = self.pause_requested();
        tokio::pin!(pause);

        let mut request = self.client.get(self.url.as_str());
        if session.start > 0 {
            debug!("Transfer {} requesting range bytes={}-", self.id, session.start);
            request = request.header(RANGE, format!("bytes={}-", session.start));
        }

        let stall_ms = self.stall_timeout.as_millis() as u64;

        // No bytes have flowed yet, so a silent server here is a transport failure
        let response = tokio::select! {
            biased;
            _ = &mut pause => return AttemptStop::Paused,
            response = tokio::time::timeout(self.stall_timeout, request.send()) => match response {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => return AttemptStop::Failed(e.into()),
                Err(_) => return AttemptStop::Failed(TransferError::Stalled(stall_ms)),
            },
        };

        let status = response.status();

        if status == StatusCode::RANGE_NOT_SATISFIABLE && session.start > 0 {
            let total = content_range_total(response.headers())
                .or((self.known_total > 0).then_some(self.known_total));
            if total == Some(session.start) {
                info!("Transfer {} already complete at {} bytes", self.id, session.start);
                session.discovered_total = total;
                return AttemptStop::AlreadyComplete;
            }
        }

        if !status.is_success() {
            return AttemptStop::Failed(TransferError::ServerError {
                status: status.as_u16(),
                message: status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string(),
            });
        }

        if session.start > 0 && status != StatusCode::PARTIAL_CONTENT {
            warn!(
                "Transfer {}: server ignored range request, restarting from byte 0",
                self.id
            );
            if let Err(e) = truncate(file).await {
                return AttemptStop::Failed(e.into());
            }
            session.start = 0;
        }

        let declared = response.content_length();
        if status == StatusCode::PARTIAL_CONTENT {
            session.discovered_total = content_range_total(response.headers());
        }
        if session.discovered_total.is_none() {
            session.discovered_total = declared.map(|len| session.start + len);
        }

        let remaining = declared.or_else(|| {
            (self.known_total > 0).then(|| self.known_total.saturating_sub(session.start))
        });
        let mut tracker = ProgressTracker::new(session.start, remaining);

        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::select! {
                biased;
                _ = &mut pause => return AttemptStop::Paused,
                next = tokio::time::timeout(self.stall_timeout, stream.next()) => next,
            };

            let chunk = match next {
                Err(_) => {
                    warn!("Transfer {} stalled for {} ms", self.id, stall_ms);
                    return AttemptStop::Stalled(stall_ms);
                }
                Ok(None) => return AttemptStop::Complete,
                Ok(Some(Err(e))) => return AttemptStop::Failed(e.into()),
                Ok(Some(Ok(chunk))) => chunk,
            };

            // Nothing more is written once a pause has been requested
            if self.paused.load(Ordering::Acquire) {
                return AttemptStop::Paused;
            }

            if let Err(e) = file.write_all(&chunk).await {
                return AttemptStop::Failed(e.into());
            }
            session.written += chunk.len() as u64;

            if let Some(percent) = tracker.update(session.written) {
                self.sink.report(percent);
                let _ = self.events.send(TransferEvent::Progress {
                    id: self.id,
                    percent,
                });
            }
        }
    }

    async fn pause_requested(&self) {
        wait_for_pause(self.paused, self.wake).await
    }
}

/// Resolves once `paused` is raised; `wake` is notified whenever it is
pub(crate) async fn wait_for_pause(paused: &AtomicBool, wake: &Notify) {
    loop {
        let notified = wake.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent wake is not lost
        notified.as_mut().enable();
        if paused.load(Ordering::Acquire) {
            return;
        }
        notified.await;
    }
}

/// Open the destination for an attempt starting at `offset`.
///
/// Offset 0 creates or truncates the file. A positive offset opens without
/// truncation and positions the cursor; the offset is reconciled against the
/// on-disk length, which wins when the two disagree.
pub(crate) async fn open_destination(path: &Path, offset: u64) -> std::io::Result<(File, u64)> {
    if offset == 0 {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .await?;
        return Ok((file, 0));
    }

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)
        .await?;
    let on_disk = file.metadata().await?.len();
    let start = offset.min(on_disk);
    if on_disk != start {
        // Bytes past the offset were never accounted for
        file.set_len(start).await?;
    }
    file.seek(SeekFrom::Start(start)).await?;
    Ok((file, start))
}

async fn truncate(file: &mut File) -> std::io::Result<()> {
    file.set_len(0).await?;
    file.seek(SeekFrom::Start(0)).await?;
    Ok(())
}

async fn sync_and_measure(file: &mut File) -> std::io::Result<u64> {
    file.flush().await?;
    file.sync_all().await?;
    Ok(file.metadata().await?.len())
}
