//! Shared types for pauseget
//!
//! This crate contains the data structures shared between the core engine
//! and the CLI: notifications, attempt outcomes, probe results and the
//! transport configuration.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Transfer Types
// ============================================================================

/// Observable state of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    /// No attempt in flight. Re-enterable after success or failure.
    Idle,
    /// An attempt is actively streaming.
    Running,
    /// A pause was requested; the next attempt waits for a resume.
    Paused,
}

/// How a single transfer attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The full resource was received.
    Success,
    /// The attempt stopped because a pause was requested.
    PausedStop,
    /// Stall, timeout or a partial transfer without a pause request.
    /// Written bytes are kept and the next attempt resumes from them.
    TransientStop,
    /// DNS, connect, TLS or HTTP status failure before data was written.
    TransportError,
    /// The destination could not be opened or positioned.
    SetupError,
}

impl AttemptOutcome {
    /// Whether this outcome is reported as `finished(true)`
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success)
    }

    /// Whether bytes written during the attempt count towards the resume offset
    pub fn keeps_partial_data(&self) -> bool {
        matches!(
            self,
            AttemptOutcome::PausedStop | AttemptOutcome::TransientStop
        )
    }
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            AttemptOutcome::Success => "completed",
            AttemptOutcome::PausedStop => "paused",
            AttemptOutcome::TransientStop => "interrupted",
            AttemptOutcome::TransportError => "transport error",
            AttemptOutcome::SetupError => "destination error",
        };
        f.write_str(text)
    }
}

// ============================================================================
// Event Types
// ============================================================================

/// Notifications emitted by a transfer to its controller
///
/// Events are delivered in the order they are produced. They originate on the
/// worker task; controllers must move any UI work onto their own context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum TransferEvent {
    Progress {
        id: Uuid,
        percent: u8,
    },
    Paused {
        id: Uuid,
    },
    Resumed {
        id: Uuid,
    },
    Finished {
        id: Uuid,
        success: bool,
        outcome: AttemptOutcome,
    },
}

impl TransferEvent {
    /// The transfer this event belongs to
    pub fn transfer_id(&self) -> Uuid {
        match self {
            TransferEvent::Progress { id, .. }
            | TransferEvent::Paused { id }
            | TransferEvent::Resumed { id }
            | TransferEvent::Finished { id, .. } => *id,
        }
    }
}

// ============================================================================
// API Types
// ============================================================================

/// Metadata learned from a header-only request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeInfo {
    pub url: String,
    pub final_url: Option<String>,
    pub size: Option<u64>,
    pub content_type: Option<String>,
    pub resumable: bool,
}

// ============================================================================
// Configuration Types
// ============================================================================

/// Transport configuration applied to the probe and every attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub user_agent: String,
    /// Connection-establishment timeout
    pub connect_timeout_ms: u64,
    /// Longest allowed gap between two body chunks
    pub stall_timeout_ms: u64,
    /// 0 disables redirect following
    pub max_redirects: usize,
    pub accept_invalid_certs: bool,
    /// Capacity of the notification channel
    pub event_capacity: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("pauseget/{}", env!("CARGO_PKG_VERSION")),
            connect_timeout_ms: 30_000,
            stall_timeout_ms: 60_000,
            max_redirects: 10,
            accept_invalid_certs: false,
            event_capacity: 1024,
        }
    }
}
