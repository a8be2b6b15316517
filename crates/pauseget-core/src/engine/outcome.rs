//! Attempt outcome classification
//!
//! Maps the reason an attempt stopped onto the outcome kinds a controller
//! understands. Only `Success` is reported as `finished(true)`.

use crate::error::TransferError;
use pauseget_types::AttemptOutcome;

/// Why the streaming loop of an attempt stopped
#[derive(Debug)]
pub(crate) enum AttemptStop {
    /// End of stream reached
    Complete,
    /// The server reported the requested range lies at or past the end
    AlreadyComplete,
    /// The pause flag was observed
    Paused,
    /// The stall timeout fired
    Stalled(u64),
    /// The destination could not be prepared
    Setup(std::io::Error),
    /// Transport or file error while the request was in flight
    Failed(TransferError),
}

/// Classify an attempt
///
/// * `written` - bytes written to the destination by this attempt
/// * `short` - the stream ended cleanly but the file is shorter than the
///   known total size
pub(crate) fn classify(stop: &AttemptStop, written: u64, short: bool) -> AttemptOutcome {
    match stop {
        AttemptStop::Complete if short => AttemptOutcome::TransientStop,
        AttemptStop::Complete | AttemptStop::AlreadyComplete => AttemptOutcome::Success,
        AttemptStop::Paused => AttemptOutcome::PausedStop,
        AttemptStop::Stalled(_) => AttemptOutcome::TransientStop,
        AttemptStop::Setup(_) => AttemptOutcome::SetupError,
        // Anything already on disk is kept for the next attempt
        AttemptStop::Failed(_) if written > 0 => AttemptOutcome::TransientStop,
        AttemptStop::Failed(e) if e.is_local() => AttemptOutcome::SetupError,
        AttemptStop::Failed(_) => AttemptOutcome::TransportError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error() -> AttemptStop {
        AttemptStop::Failed(TransferError::ServerError {
            status: 404,
            message: "not found".to_string(),
        })
    }

    #[test]
    fn test_complete_is_success() {
        assert_eq!(classify(&AttemptStop::Complete, 10, false), AttemptOutcome::Success);
        assert_eq!(classify(&AttemptStop::AlreadyComplete, 0, false), AttemptOutcome::Success);
    }

    #[test]
    fn test_short_body_is_transient() {
        assert_eq!(classify(&AttemptStop::Complete, 10, true), AttemptOutcome::TransientStop);
    }

    #[test]
    fn test_pause_is_not_a_failure_kind() {
        assert_eq!(classify(&AttemptStop::Paused, 0, false), AttemptOutcome::PausedStop);
        assert_eq!(classify(&AttemptStop::Paused, 400_000, false), AttemptOutcome::PausedStop);
    }

    #[test]
    fn test_stall_is_transient() {
        assert_eq!(classify(&AttemptStop::Stalled(100), 0, false), AttemptOutcome::TransientStop);
    }

    #[test]
    fn test_failure_depends_on_written_bytes() {
        assert_eq!(classify(&server_error(), 0, false), AttemptOutcome::TransportError);
        assert_eq!(classify(&server_error(), 1, false), AttemptOutcome::TransientStop);
    }

    #[test]
    fn test_local_failures_are_setup_errors() {
        let io = || std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(classify(&AttemptStop::Setup(io()), 0, false), AttemptOutcome::SetupError);
        assert_eq!(
            classify(&AttemptStop::Failed(TransferError::Io(io())), 0, false),
            AttemptOutcome::SetupError
        );
    }
}
