//! HTTP client construction
//!
//! One client is built per transfer and shared by the probe and every
//! attempt, so redirect, TLS and timeout policy stay consistent.

use crate::error::TransferError;
use pauseget_types::TransferConfig;
use reqwest::redirect::Policy;
use reqwest::Client;
use std::time::Duration;

/// Build the HTTP client for a transfer
pub fn build_client(config: &TransferConfig) -> Result<Client, TransferError> {
    let redirect = if config.max_redirects == 0 {
        Policy::none()
    } else {
        Policy::limited(config.max_redirects)
    };

    // No overall request timeout: a large body may legitimately take hours.
    // Stalls are detected per chunk by the attempt loop instead.
    Client::builder()
        .user_agent(config.user_agent.as_str())
        .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
        .redirect(redirect)
        .danger_accept_invalid_certs(config.accept_invalid_certs)
        .build()
        .map_err(|e| TransferError::ClientBuild(e.to_string()))
}
