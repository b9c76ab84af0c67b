//! Unified error types for Stillpoint.
//!
//! Configuration errors are fatal and must reach the caller at startup.
//! Storage and sync errors are infrastructure failures: callers that must not
//! block the learner can log them and fall back through [`FailOpen`].

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for Stillpoint operations.
#[derive(Error, Debug)]
pub enum StillpointError {
    /// I/O errors from progress file operations.
    #[error("storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// JSON or TOML serialization errors.
    #[error("serialization error: {message}")]
    Serde { message: String },

    /// Malformed configuration (bad access window, zero gap, ...).
    #[error("config error: {message}")]
    Config { message: String },

    /// The frame source could not start; no session was created.
    #[error("capture unavailable: {message}")]
    CaptureUnavailable { message: String },

    /// A fetched record is older than a local write that is still in flight.
    #[error("stale reconciliation for level {level} {day}")]
    StaleReconciliation { level: u32, day: String },

    /// The remote progress store rejected or failed a request.
    #[error("sync error: {message}")]
    Sync { message: String },

    /// Operation not valid in the current state.
    #[error("invalid state: {message}")]
    InvalidState { message: String },
}

/// A specialized Result type for Stillpoint operations.
pub type Result<T> = std::result::Result<T, StillpointError>;

impl StillpointError {
    /// Create a storage error from an I/O error.
    pub fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Create a serialization error.
    pub fn serde(message: impl Into<String>) -> Self {
        Self::Serde {
            message: message.into(),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a capture-unavailable error.
    pub fn capture_unavailable(message: impl Into<String>) -> Self {
        Self::CaptureUnavailable {
            message: message.into(),
        }
    }

    /// Create a stale reconciliation error.
    pub fn stale(level: u32, day: impl Into<String>) -> Self {
        Self::StaleReconciliation {
            level,
            day: day.into(),
        }
    }

    /// Create a sync error.
    pub fn sync(message: impl Into<String>) -> Self {
        Self::Sync {
            message: message.into(),
        }
    }

    /// Create an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Whether the caller may log and continue.
    ///
    /// Configuration errors are never recoverable; everything that touches
    /// storage or the remote store is.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Config { .. })
    }
}

impl From<io::Error> for StillpointError {
    fn from(err: io::Error) -> Self {
        Self::Storage {
            path: PathBuf::new(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for StillpointError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serde {
            message: err.to_string(),
        }
    }
}

/// Trait for fail-open error handling.
///
/// Logs the error and returns a safe default instead of propagating it.
pub trait FailOpen<T> {
    /// Handle an error by logging a warning and returning the default value.
    fn fail_open_default(self, context: &str) -> T
    where
        T: Default;

    /// Handle an error by logging a warning and returning the provided fallback.
    fn fail_open_with(self, context: &str, fallback: T) -> T;
}

impl<T> FailOpen<T> for Result<T> {
    fn fail_open_default(self, context: &str) -> T
    where
        T: Default,
    {
        match self {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!("{}: {} (fail-open: using default)", context, err);
                T::default()
            }
        }
    }

    fn fail_open_with(self, context: &str, fallback: T) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!("{}: {} (fail-open: using fallback)", context, err);
                fallback
            }
        }
    }
}
