//! Error types for pauseget core

use thiserror::Error;

/// Errors that can occur in pauseget core
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    #[error("No data received for {0} ms")]
    Stalled(u64),

    #[error("Transfer is busy: {0}")]
    Busy(String),

    #[error("No async runtime available: {0}")]
    Runtime(String),

    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),
}

impl TransferError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::Network(e) => !e.is_builder() && !e.is_redirect(),
            TransferError::Stalled(_) => true,
            TransferError::ServerError { status, .. } => *status >= 500 || *status == 408,
            _ => false,
        }
    }

    /// Whether this error originated on the local side (file system)
    pub fn is_local(&self) -> bool {
        matches!(self, TransferError::Io(_))
    }
}

// Allow converting to String for display layers
impl From<TransferError> for String {
    fn from(error: TransferError) -> Self {
        error.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(TransferError::Stalled(100).is_retryable());
        assert!(TransferError::ServerError { status: 503, message: String::new() }.is_retryable());
        assert!(!TransferError::ServerError { status: 404, message: String::new() }.is_retryable());
        assert!(!TransferError::Busy("attempt in flight".into()).is_retryable());
        assert!(!TransferError::InvalidUrl("x".into()).is_retryable());
    }

    #[test]
    fn test_io_is_local() {
        let err = TransferError::from(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(err.is_local());
        assert!(!err.is_retryable());
    }
}
