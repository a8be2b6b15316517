//! In-process HTTP server for transfer tests
//!
//! Speaks just enough HTTP/1.1 for the engine: HEAD, GET, open-ended
//! `Range: bytes=N-`, throttled streaming, omitted lengths, forced status
//! codes, a one-shot stall and an unanswered HEAD. Every connection is closed after one response.

#![allow(dead_code)]

use pauseget_types::TransferEvent;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

/// A request as seen by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub method: String,
    pub range: Option<String>,
}

/// Behavior of the mock server
#[derive(Debug, Clone)]
pub struct MockOptions {
    pub body: Arc<Vec<u8>>,
    pub chunk_size: usize,
    pub chunk_delay: Duration,
    /// Send Content-Length on HEAD
    pub head_length: bool,
    /// Send Content-Length on GET (otherwise the body is close-delimited)
    pub get_length: bool,
    pub honor_range: bool,
    /// Answer every request with this status and an empty body
    pub status: Option<u16>,
    /// Stop sending after this many body bytes, once
    pub stall_after: Option<usize>,
    /// Read HEAD requests but never answer them
    pub silent_head: bool,
}

impl MockOptions {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body: Arc::new(body),
            chunk_size: 16 * 1024,
            chunk_delay: Duration::ZERO,
            head_length: true,
            get_length: true,
            honor_range: true,
            status: None,
            stall_after: None,
            silent_head: false,
        }
    }

    pub fn throttled(mut self, chunk_size: usize, delay_ms: u64) -> Self {
        self.chunk_size = chunk_size;
        self.chunk_delay = Duration::from_millis(delay_ms);
        self
    }
}

pub struct MockServer {
    url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockServer {
    pub async fn start(options: MockOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}/file.bin");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let stalled = Arc::new(AtomicBool::new(false));

        let handle = {
            let requests = requests.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let options = options.clone();
                    let requests = requests.clone();
                    let stalled = stalled.clone();
                    tokio::spawn(async move {
                        let _ = serve(stream, options, requests, stalled).await;
                    });
                }
            })
        };

        Self {
            url,
            requests,
            handle,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn gets(&self) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == "GET")
            .collect()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(
    mut stream: TcpStream,
    options: MockOptions,
    requests: Arc<Mutex<Vec<Recorded>>>,
    stalled: Arc<AtomicBool>,
) -> std::io::Result<()> {
    let head = read_head(&mut stream).await?;
    let mut lines = head.lines();
    let method = lines
        .next()
        .and_then(|line| line.split_whitespace().next())
        .unwrap_or_default()
        .to_string();
    let range = lines.find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("range")
            .then(|| value.trim().to_string())
    });
    requests.lock().unwrap().push(Recorded {
        method: method.clone(),
        range: range.clone(),
    });

    if let Some(status) = options.status {
        let response =
            format!("HTTP/1.1 {status} Forced\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        stream.write_all(response.as_bytes()).await?;
        return stream.shutdown().await;
    }

    let len = options.body.len();

    if method == "HEAD" && options.silent_head {
        tokio::time::sleep(Duration::from_secs(30)).await;
        return Ok(());
    }

    if method == "HEAD" {
        let mut response = String::from("HTTP/1.1 200 OK\r\nAccept-Ranges: bytes\r\n");
        if options.head_length {
            response.push_str(&format!("Content-Length: {len}\r\n"));
        }
        response.push_str("Connection: close\r\n\r\n");
        stream.write_all(response.as_bytes()).await?;
        return stream.shutdown().await;
    }

    let start = range
        .as_deref()
        .filter(|_| options.honor_range)
        .and_then(|r| r.strip_prefix("bytes="))
        .and_then(|r| r.trim_end_matches('-').parse::<usize>().ok());

    let mut response = match start {
        Some(start) if start >= len => {
            let response = format!(
                "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{len}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            );
            stream.write_all(response.as_bytes()).await?;
            return stream.shutdown().await;
        }
        Some(start) => format!(
            "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes {}-{}/{}\r\n",
            start,
            len - 1,
            len
        ),
        None => String::from("HTTP/1.1 200 OK\r\n"),
    };
    let start = start.unwrap_or(0);
    if options.get_length {
        response.push_str(&format!("Content-Length: {}\r\n", len - start));
    }
    response.push_str("Connection: close\r\n\r\n");
    stream.write_all(response.as_bytes()).await?;

    let stall_at = match options.stall_after {
        Some(limit) if !stalled.swap(true, Ordering::SeqCst) => Some(start + limit),
        _ => None,
    };

    let mut pos = start;
    while pos < len {
        if stall_at.map_or(false, |at| pos >= at) {
            stream.flush().await?;
            tokio::time::sleep(Duration::from_secs(30)).await;
            return Ok(());
        }
        let mut end = (pos + options.chunk_size).min(len);
        if let Some(at) = stall_at {
            end = end.min(at);
        }
        stream.write_all(&options.body[pos..end]).await?;
        pos = end;
        if !options.chunk_delay.is_zero() {
            tokio::time::sleep(options.chunk_delay).await;
        }
    }
    stream.shutdown().await
}

async fn read_head(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Deterministic, non-repeating-at-chunk-boundaries test content
pub fn test_body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Next event, failing the test if none arrives in time
pub async fn next_event(rx: &mut broadcast::Receiver<TransferEvent>) -> TransferEvent {
    tokio::time::timeout(Duration::from_secs(20), rx.recv())
        .await
        .expect("timed out waiting for a transfer event")
        .expect("event channel closed")
}

/// Collect events up to and including `Finished`
pub async fn until_finished(rx: &mut broadcast::Receiver<TransferEvent>) -> Vec<TransferEvent> {
    let mut events = Vec::new();
    loop {
        let event = next_event(rx).await;
        let done = matches!(event, TransferEvent::Finished { .. });
        events.push(event);
        if done {
            return events;
        }
    }
}

pub fn percents(events: &[TransferEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            TransferEvent::Progress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect()
}

pub fn finished(events: &[TransferEvent]) -> (bool, pauseget_types::AttemptOutcome) {
    match events.last() {
        Some(TransferEvent::Finished {
            success, outcome, ..
        }) => (*success, *outcome),
        other => panic!("expected Finished, got {other:?}"),
    }
}
