//! Metadata probe
//!
//! A header-only request issued before the first attempt to learn the
//! resource size. The probe is best effort: callers treat any error as
//! "size unknown" and proceed with the download.

use crate::error::TransferError;
use pauseget_types::ProbeInfo;
use reqwest::header::{HeaderMap, ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE};
use reqwest::Client;
use tracing::{debug, info};
use url::Url;

/// Probe a URL for metadata
pub async fn probe(client: &Client, url: &Url) -> Result<ProbeInfo, TransferError> {
    info!("Probing URL: {}", url);

    let response = client.head(url.as_str()).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(TransferError::ServerError {
            status: status.as_u16(),
            message: "HEAD request rejected".to_string(),
        });
    }

    let headers = response.headers();
    // HEAD responses carry no body, so read the header rather than the body hint
    let size = header_u64(headers, CONTENT_LENGTH);
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let resumable = headers
        .get(ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_ascii_lowercase().contains("bytes"))
        .unwrap_or(false);

    debug!("Probe result: size={:?}, resumable={}", size, resumable);

    Ok(ProbeInfo {
        url: url.to_string(),
        final_url: Some(response.url().to_string()),
        size,
        content_type,
        resumable,
    })
}

/// Parse a numeric header value
pub(crate) fn header_u64(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Total length from a `Content-Range` header: "bytes 0-99/1234" or "bytes */1234"
pub(crate) fn content_range_total(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(CONTENT_RANGE)?.to_str().ok()?;
    let (_, total) = value.rsplit_once('/')?;
    let total = total.trim();
    if total == "*" {
        None
    } else {
        total.parse().ok()
    }
}
