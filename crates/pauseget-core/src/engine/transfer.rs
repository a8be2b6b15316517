//! Transfer - the control surface of a single download
//!
//! A [`Transfer`] owns the state of one download (URL, destination, resume
//! offset, total size) and runs at most one attempt at a time on a worker
//! task. Controllers call [`Transfer::start`], [`Transfer::request_pause`]
//! and [`Transfer::resume_download`] from any thread and observe the result
//! through [`Transfer::subscribe`].
//!
//! State machine:
//!
//! ```text
//! Idle --start--> Running --pause--> Paused --resume--> Running
//!                    |
//!                    +--complete/error--> Idle
//! ```

use crate::engine::attempt::{wait_for_pause, AttemptContext, AttemptReport};
use crate::engine::client::build_client;
use crate::engine::probe::probe;
use crate::engine::progress::{cumulative_percent, ProgressSink};
use crate::error::TransferError;
use pauseget_types::{AttemptOutcome, TransferConfig, TransferEvent, TransferState};
use parking_lot::Mutex;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

/// Handle to a pausable, resumable download
///
/// Cloning is cheap; all clones control the same transfer.
#[derive(Clone)]
pub struct Transfer {
    inner: Arc<TransferInner>,
}

struct TransferInner {
    id: Uuid,
    url: Url,
    destination: PathBuf,
    config: TransferConfig,
    client: Client,
    /// Runtime the worker task is spawned on
    runtime: Handle,
    sink: Box<dyn ProgressSink>,
    event_tx: broadcast::Sender<TransferEvent>,
    /// Bytes durably written; written by the worker only
    resume_offset: AtomicU64,
    /// Resource size, 0 while unknown; written by the worker only
    total_size: AtomicU64,
    /// Intent to stop the current attempt early
    paused: AtomicBool,
    /// True only while an attempt is streaming
    running: AtomicBool,
    /// A worker task owns the transfer (probe or attempt in progress)
    busy: AtomicBool,
    probed: AtomicBool,
    wake: Notify,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Transfer {
    /// Create a transfer with the default configuration
    ///
    /// Must be called from within a tokio runtime; the worker task is spawned
    /// on that runtime even when control calls come from other threads.
    pub fn new(
        url: &str,
        destination: impl Into<PathBuf>,
        sink: impl ProgressSink + 'static,
    ) -> Result<Self, TransferError> {
        Self::with_config(url, destination, sink, TransferConfig::default())
    }

    /// Create a transfer with an explicit configuration
    pub fn with_config(
        url: &str,
        destination: impl Into<PathBuf>,
        sink: impl ProgressSink + 'static,
        config: TransferConfig,
    ) -> Result<Self, TransferError> {
        let parsed = Url::parse(url).map_err(|_| TransferError::InvalidUrl(url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(TransferError::InvalidUrl(url.to_string()));
        }

        let runtime = Handle::try_current().map_err(|e| TransferError::Runtime(e.to_string()))?;
        let client = build_client(&config)?;
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));

        Ok(Self {
            inner: Arc::new(TransferInner {
                id: Uuid::new_v4(),
                url: parsed,
                destination: destination.into(),
                config,
                client,
                runtime,
                sink: Box::new(sink),
                event_tx,
                resume_offset: AtomicU64::new(0),
                total_size: AtomicU64::new(0),
                paused: AtomicBool::new(false),
                running: AtomicBool::new(false),
                busy: AtomicBool::new(false),
                probed: AtomicBool::new(false),
                wake: Notify::new(),
                worker: Mutex::new(None),
            }),
        })
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    pub fn destination(&self) -> &Path {
        &self.inner.destination
    }

    /// Subscribe to notifications
    ///
    /// Subscribe before calling [`Transfer::start`] to see every event.
    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Whether a pause has been requested and not yet resumed
    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Acquire)
    }

    /// Whether an attempt is streaming right now
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn state(&self) -> TransferState {
        if self.is_running() {
            TransferState::Running
        } else if self.is_paused() {
            TransferState::Paused
        } else {
            TransferState::Idle
        }
    }

    /// Bytes already written. Stable only between attempts.
    pub fn resume_offset(&self) -> u64 {
        self.inner.resume_offset.load(Ordering::Acquire)
    }

    /// Size of the resource, `None` while unknown. Stable only between attempts.
    pub fn total_size(&self) -> Option<u64> {
        match self.inner.total_size.load(Ordering::Acquire) {
            0 => None,
            size => Some(size),
        }
    }

    /// Cumulative percent complete derived from the stored offset
    pub fn percent(&self) -> Option<u8> {
        cumulative_percent(
            self.resume_offset(),
            self.inner.total_size.load(Ordering::Acquire),
        )
    }

    /// Start the transfer on the worker task
    ///
    /// The first call probes the resource size and runs the first attempt.
    /// After a failed attempt a further call retries from the retained
    /// offset. Returns `false` without doing anything while an attempt is in
    /// flight or while paused; use [`Transfer::resume_download`] for the latter.
    pub fn start(&self) -> bool {
        if self.is_paused() {
            debug!("Transfer {} is paused, not starting", self.inner.id);
            return false;
        }
        if !self.claim_worker() {
            warn!("Transfer {} is already running", self.inner.id);
            return false;
        }

        info!(
            "Starting transfer {}: {} -> {} (offset {})",
            self.inner.id,
            self.inner.url,
            self.inner.destination.display(),
            self.resume_offset()
        );
        self.spawn_worker();
        true
    }

    /// Ask the running attempt to stop early
    ///
    /// Emits `Paused` immediately; the attempt stops at its next chunk
    /// boundary. A no-op returning `false` when nothing is running or a pause
    /// is already pending.
    pub fn request_pause(&self) -> bool {
        let inner = &self.inner;
        if !inner.running.load(Ordering::Acquire) {
            debug!("Transfer {}: nothing to pause", inner.id);
            return false;
        }
        if inner.paused.swap(true, Ordering::AcqRel) {
            return false;
        }

        info!("Signaled pause for transfer {}", inner.id);
        inner.wake.notify_waiters();
        self.emit(TransferEvent::Paused { id: inner.id });
        true
    }

    /// Resume a paused transfer from the stored offset
    ///
    /// Emits `Resumed` and the current cumulative progress, then launches a
    /// new attempt. A no-op returning `false` while running, when not paused,
    /// or while the paused attempt is still winding down.
    pub fn resume_download(&self) -> bool {
        let inner = &self.inner;
        if inner.running.load(Ordering::Acquire) || !inner.paused.load(Ordering::Acquire) {
            debug!("Transfer {}: nothing to resume", inner.id);
            return false;
        }
        if !self.claim_worker() {
            debug!("Transfer {}: previous attempt still stopping", inner.id);
            return false;
        }
        if inner
            .paused
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            inner.busy.store(false, Ordering::Release);
            return false;
        }

        info!(
            "Resuming transfer {} from byte {}",
            inner.id,
            self.resume_offset()
        );
        self.emit(TransferEvent::Resumed { id: inner.id });
        if let Some(percent) = self.percent() {
            self.report_progress(percent);
        }
        self.spawn_worker();
        true
    }

    /// Re-derive the resume offset from an existing destination file
    ///
    /// Used to continue a download left behind by an earlier process. Only
    /// allowed while no worker is active.
    pub async fn adopt_partial_file(&self) -> Result<u64, TransferError> {
        if self.inner.busy.load(Ordering::Acquire) {
            return Err(TransferError::Busy(
                "cannot adopt a partial file while a transfer is active".to_string(),
            ));
        }

        let offset = match tokio::fs::metadata(&self.inner.destination).await {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };

        info!(
            "Transfer {} adopting {} existing bytes from {}",
            self.inner.id,
            offset,
            self.inner.destination.display()
        );
        self.inner.resume_offset.store(offset, Ordering::Release);
        Ok(offset)
    }

    /// Stop the worker and wait for it to release the destination
    ///
    /// Pausing preserves the partial file and offset, so the transfer can be
    /// resumed later (or adopted by a new process).
    pub async fn shutdown(&self) {
        if self.inner.busy.load(Ordering::Acquire) && !self.request_pause() {
            // Not streaming yet: make the upcoming attempt stop before writing
            self.inner.paused.store(true, Ordering::Release);
            self.inner.wake.notify_waiters();
        }

        let handle = self.inner.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Transfer {} worker ended abnormally: {}", self.inner.id, e);
            }
        }
    }

    /// Claim the worker slot. Serialized with `finish` through the worker
    /// lock so a new attempt never starts before the previous `Finished`.
    fn claim_worker(&self) -> bool {
        let _worker = self.inner.worker.lock();
        self.inner
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn spawn_worker(&self) {
        let this = self.clone();
        let handle = self.inner.runtime.spawn(async move { this.run_worker().await });
        *self.inner.worker.lock() = Some(handle);
    }

    fn emit(&self, event: TransferEvent) {
        let _ = self.inner.event_tx.send(event);
    }

    fn report_progress(&self, percent: u8) {
        self.inner.sink.report(percent);
        self.emit(TransferEvent::Progress {
            id: self.inner.id,
            percent,
        });
    }

    /// Body of the worker task: probe once, run one attempt, publish the result
    async fn run_worker(self) {
        let inner = &self.inner;

        if !inner.probed.swap(true, Ordering::AcqRel) && self.total_size().is_none() {
            self.probe_size().await;
        }

        let total = inner.total_size.load(Ordering::Acquire);
        let offset = inner.resume_offset.load(Ordering::Acquire);
        if total > 0 && offset > total {
            warn!(
                "Transfer {}: {} bytes on disk exceed the resource size {}, starting over",
                inner.id, offset, total
            );
            inner.resume_offset.store(0, Ordering::Release);
        }

        let report = AttemptContext {
            id: inner.id,
            url: &inner.url,
            destination: &inner.destination,
            client: &inner.client,
            resume_offset: inner.resume_offset.load(Ordering::Acquire),
            known_total: total,
            stall_timeout: Duration::from_millis(inner.config.stall_timeout_ms),
            paused: &inner.paused,
            running: &inner.running,
            wake: &inner.wake,
            sink: inner.sink.as_ref(),
            events: &inner.event_tx,
        }
        .run()
        .await;

        self.finish(report);
    }

    /// Best-effort header probe; failure leaves the size unknown
    ///
    /// Bounded by the stall timeout and abandoned as soon as a pause is
    /// requested, so a silent server never holds up the attempt.
    async fn probe_size(&self) {
        let inner = &self.inner;
        let limit = Duration::from_millis(inner.config.stall_timeout_ms);

        let result = tokio::select! {
            biased;
            _ = wait_for_pause(&inner.paused, &inner.wake) => {
                debug!("Transfer {}: probe abandoned on pause", inner.id);
                return;
            }
            result = tokio::time::timeout(limit, probe(&inner.client, &inner.url)) => result,
        };

        match result {
            Ok(Ok(info)) => match info.size.filter(|size| *size > 0) {
                Some(size) => {
                    info!("Transfer {}: resource size {} bytes", inner.id, size);
                    inner.total_size.store(size, Ordering::Release);
                }
                None => debug!("Transfer {}: probe reported no size", inner.id),
            },
            Ok(Err(e)) => warn!(
                "Transfer {}: probe failed ({}), size will be learned from the response",
                inner.id, e
            ),
            Err(_) => warn!(
                "Transfer {}: probe got no answer within {} ms, size will be learned from the response",
                inner.id, inner.config.stall_timeout_ms
            ),
        }
    }

    /// Apply an attempt's report to the stored offsets and notify
    fn finish(&self, report: AttemptReport) {
        let inner = &self.inner;
        let mut total = inner.total_size.load(Ordering::Acquire);
        if total == 0 {
            total = report.discovered_total.unwrap_or(0);
        }

        match report.outcome {
            AttemptOutcome::SetupError => {
                // The destination was never touched
            }
            AttemptOutcome::Success => {
                if total == 0 || report.end_offset > total {
                    total = report.end_offset;
                }
                inner.resume_offset.store(0, Ordering::Release);
                inner.paused.store(false, Ordering::Release);
            }
            _ => {
                // The file length is the durable record of progress
                if total > 0 && report.end_offset > total {
                    total = report.end_offset;
                }
                inner.resume_offset.store(report.end_offset, Ordering::Release);
            }
        }
        inner.total_size.store(total, Ordering::Release);

        let success = report.outcome.is_success();
        match &report.error {
            Some(error) => warn!(
                "Transfer {} finished: {} ({}), started at {}, offset now {}",
                inner.id,
                report.outcome,
                error,
                report.start_offset,
                self.resume_offset()
            ),
            None => info!(
                "Transfer {} finished: {}, {} bytes this attempt, offset now {}",
                inner.id,
                report.outcome,
                report.written,
                self.resume_offset()
            ),
        }

        // `Finished` goes out before the worker is released; a controller
        // reacting to it waits on the lock, never on a busy worker
        let _worker = inner.worker.lock();
        self.emit(TransferEvent::Finished {
            id: inner.id,
            success,
            outcome: report.outcome,
        });
        inner.busy.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for Transfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transfer")
            .field("id", &self.inner.id)
            .field("url", &self.inner.url.as_str())
            .field("destination", &self.inner.destination)
            .field("state", &self.state())
            .field("resume_offset", &self.resume_offset())
            .field("total_size", &self.total_size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::progress::NoProgress;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_new_rejects_bad_urls() {
        let err = Transfer::new("not a url", "/tmp/x", NoProgress).unwrap_err();
        assert!(matches!(err, TransferError::InvalidUrl(_)));

        let err = Transfer::new("ftp://example.com/file", "/tmp/x", NoProgress).unwrap_err();
        assert!(matches!(err, TransferError::InvalidUrl(_)));
    }

    #[test]
    fn test_new_requires_runtime() {
        let err = Transfer::new("http://example.com/file", "/tmp/x", NoProgress).unwrap_err();
        assert!(matches!(err, TransferError::Runtime(_)));
    }

    #[tokio::test]
    async fn test_initial_state_is_idle() {
        let transfer = Transfer::new("http://example.com/file", "/tmp/x", NoProgress).unwrap();
        assert_eq!(transfer.state(), TransferState::Idle);
        assert_eq!(transfer.resume_offset(), 0);
        assert_eq!(transfer.total_size(), None);
        assert_eq!(transfer.percent(), None);
        assert!(!transfer.is_paused());
    }

    #[tokio::test]
    async fn test_pause_while_idle_is_noop() {
        let transfer = Transfer::new("http://example.com/file", "/tmp/x", NoProgress).unwrap();
        let mut rx = transfer.subscribe();

        assert!(!transfer.request_pause());
        assert!(!transfer.is_paused());
        assert_eq!(transfer.state(), TransferState::Idle);
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_resume_without_pause_is_noop() {
        let transfer = Transfer::new("http://example.com/file", "/tmp/x", NoProgress).unwrap();
        let mut rx = transfer.subscribe();

        assert!(!transfer.resume_download());
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_adopt_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.bin");
        let transfer = Transfer::new("http://example.com/file", &path, NoProgress).unwrap();

        assert_eq!(assert_ok!(transfer.adopt_partial_file().await), 0);

        tokio::fs::write(&path, vec![0u8; 1234]).await.unwrap();
        assert_eq!(assert_ok!(transfer.adopt_partial_file().await), 1234);
        assert_eq!(transfer.resume_offset(), 1234);
    }
}
