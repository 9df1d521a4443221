//! # Error Handling
//!
//! Every failure in the pipeline is an [`OcrError`]. Errors are scoped to a
//! single diagram: batch runs and watch sessions log them, bump a counter and
//! move on. Only configuration errors found at startup end the process.
//!
//! ## Error Classification
//!
//! - [`Retryable`]: errors a caller may retry; the recognizer owns the backoff
//! - [`classify::is_vanished`]: sources that disappeared, skipped rather than
//!   counted as failures
//!
//! ## Usage
//!
//! ```rust
//! use excalidraw_ocr::error::{OcrError, Retryable};
//!
//! let error = OcrError::timeout("recognition request", 60_000);
//! assert!(error.is_retryable());
//! assert_eq!(error.category(), "timeout");
//! ```

use std::error::Error as StdError;
use std::path::Path;

/// Base error type for the OCR pipeline
#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    /// Path failed validation (traversal, sensitive directory, symlink)
    #[error("Rejected path '{path}': {reason}")]
    PathRejected { path: String, reason: String },

    /// File was still being written after all stability checks
    #[error("File '{path}' still changing after {attempts} stability check(s)")]
    FileUnstable { path: String, attempts: usize },

    /// Malformed, oversized or otherwise unusable diagram payload
    #[error("Invalid diagram payload: {reason}")]
    PayloadInvalid { reason: String },

    /// Source disappeared before or during processing
    #[error("File vanished: {path}")]
    FileVanished { path: String },

    /// Element list could not be turned into a canvas
    #[error("Render failed: {reason}")]
    Render { reason: String },

    /// Canvas could not be rasterized
    #[error("Rasterization failed: {reason}")]
    Rasterize { reason: String },

    /// Operation did not finish within its deadline
    #[error("Timeout during {operation} after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// Recognition service answered with an error
    #[error("Recognition service error{}: {message}", .status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
    Remote { status: Option<u16>, message: String },

    /// Recognition service answered with something we cannot read
    #[error("Malformed recognition response: {reason}")]
    MalformedResponse { reason: String },

    /// Transport-level failure talking to a remote service
    #[error("Network error during {operation}")]
    Network {
        operation: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    /// Filesystem notification source could not be set up
    #[error("Watcher error: {reason}")]
    Watcher { reason: String },

    /// Configuration validation errors
    #[error("Configuration error in '{field}': {reason} (value: {value})")]
    Config {
        field: String,
        value: String,
        reason: String,
    },

    /// I/O errors
    #[error("I/O error during {operation}{}: {source}", .path.as_ref().map(|p| format!(" on '{}'", p)).unwrap_or_default())]
    Io {
        operation: String,
        path: Option<String>,
        #[source]
        source: std::io::Error,
    },
}

impl OcrError {
    /// Create a path rejection error
    pub fn path_rejected(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::PathRejected {
            path: path.as_ref().display().to_string(),
            reason: reason.into(),
        }
    }

    /// Create an unstable file error
    pub fn file_unstable(path: impl AsRef<Path>, attempts: usize) -> Self {
        Self::FileUnstable {
            path: path.as_ref().display().to_string(),
            attempts,
        }
    }

    /// Create an invalid payload error
    pub fn payload_invalid(reason: impl Into<String>) -> Self {
        Self::PayloadInvalid {
            reason: reason.into(),
        }
    }

    /// Create a vanished file error
    pub fn file_vanished(path: impl AsRef<Path>) -> Self {
        Self::FileVanished {
            path: path.as_ref().display().to_string(),
        }
    }

    /// Create a render error
    pub fn render(reason: impl Into<String>) -> Self {
        Self::Render {
            reason: reason.into(),
        }
    }

    /// Create a rasterization error
    pub fn rasterize(reason: impl Into<String>) -> Self {
        Self::Rasterize {
            reason: reason.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms,
        }
    }

    /// Create a remote service error
    pub fn remote(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Remote {
            status,
            message: message.into(),
        }
    }

    /// Create a malformed response error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            reason: reason.into(),
        }
    }

    /// Create a network error
    pub fn network(
        operation: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Network {
            operation: operation.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a watcher error
    pub fn watcher(reason: impl Into<String>) -> Self {
        Self::Watcher {
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Config {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create an I/O error bound to a path.
    ///
    /// A `NotFound` error is reported as [`OcrError::FileVanished`] so callers
    /// can tell a deleted source apart from a genuine I/O failure.
    pub fn io(operation: impl Into<String>, path: impl AsRef<Path>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            return Self::file_vanished(path);
        }
        Self::Io {
            operation: operation.into(),
            path: Some(path.as_ref().display().to_string()),
            source,
        }
    }

    /// Get the error category as a string
    pub fn category(&self) -> &'static str {
        match self {
            Self::PathRejected { .. } => "path_rejected",
            Self::FileUnstable { .. } => "file_unstable",
            Self::PayloadInvalid { .. } => "payload_invalid",
            Self::FileVanished { .. } => "file_vanished",
            Self::Render { .. } => "render",
            Self::Rasterize { .. } => "rasterize",
            Self::Timeout { .. } => "timeout",
            Self::Remote { .. } => "remote",
            Self::MalformedResponse { .. } => "malformed_response",
            Self::Network { .. } => "network",
            Self::Watcher { .. } => "watcher",
            Self::Config { .. } => "config",
            Self::Io { .. } => "io",
        }
    }
}

/// Result type alias using our custom error type
pub type OcrResult<T> = Result<T, OcrError>;

/// HTTP status codes the recognition service may recover from on its own.
pub const RETRYABLE_STATUS: [u16; 5] = [429, 500, 502, 503, 504];

/// Trait for errors that can be retried
pub trait Retryable {
    /// Check if this error can be retried
    fn is_retryable(&self) -> bool;
}

impl Retryable for OcrError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Network { .. } | Self::FileUnstable { .. } => true,
            Self::Remote {
                status: Some(status),
                ..
            } => RETRYABLE_STATUS.contains(status),
            _ => false,
        }
    }
}

/// Error classification utilities
pub mod classify {
    use super::*;

    /// Check if the source simply went away; such files are skipped, not counted
    pub fn is_vanished(error: &OcrError) -> bool {
        matches!(error, OcrError::FileVanished { .. })
    }
}

impl From<serde_json::Error> for OcrError {
    fn from(error: serde_json::Error) -> Self {
        Self::payload_invalid(format!("failed to parse decompressed JSON: {}", error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = OcrError::config("concurrency", "0", "must be greater than 0");
        assert_eq!(error.category(), "config");
        assert!(!error.is_retryable());
        assert!(!classify::is_vanished(&error));
    }

    #[test]
    fn test_remote_status_classification() {
        assert!(OcrError::remote(Some(503), "unavailable").is_retryable());
        assert!(OcrError::remote(Some(429), "slow down").is_retryable());
        assert!(!OcrError::remote(Some(401), "bad key").is_retryable());
        assert!(!OcrError::remote(None, "quota").is_retryable());
    }

    #[test]
    fn test_error_traits() {
        let timeout_error = OcrError::timeout("recognition", 60_000);
        assert!(timeout_error.is_retryable());
        assert!(OcrError::network("send", std::io::Error::other("reset")).is_retryable());
        assert!(!OcrError::malformed("no choices").is_retryable());
    }

    #[test]
    fn test_not_found_maps_to_vanished() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let error = OcrError::io("read", "/tmp/a.excalidraw.md", io);
        assert!(classify::is_vanished(&error));

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let error = OcrError::io("read", "/tmp/a.excalidraw.md", io);
        assert_eq!(error.category(), "io");
        assert!(error.to_string().contains("/tmp/a.excalidraw.md"));
    }
}
