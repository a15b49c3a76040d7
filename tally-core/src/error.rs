//! # Error Handling
//!
//! Error types for TallyDB operations.
//!
//! ## Design Principles
//!
//! 1. **Actionable**: Every error should guide the caller toward resolution
//! 2. **Contextual**: Errors include relevant context (paths, counters)
//! 3. **Recoverable**: Distinguish between fatal and recoverable errors
//!
//! A filter value that is absent from the dictionary is *not* an error: the
//! query evaluates to zero matches.

use thiserror::Error;

/// Result type alias for TallyDB operations
pub type Result<T> = std::result::Result<T, Error>;

/// Primary error type for TallyDB
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed query: inverted block range, too many topic positions.
    #[error("invalid query: {message}")]
    InvalidQuery { message: String },

    /// Underlying filesystem or mapping failure. Ingestion aborts the batch
    /// without publication; queries surface this to the caller.
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// On-disk state cannot be opened: bad magic, version mismatch, or
    /// inconsistencies that tail-truncation cannot repair. The operator must
    /// wipe the data directory and replay from upstream.
    #[error("index corruption detected: {details}")]
    Corrupt { details: String },

    /// Caller broke a write-path contract: out-of-order ingestion batch,
    /// id counter overflow. The index remains usable at its pre-batch state.
    #[error("invariant violation: {message}")]
    InvariantViolation { message: String },

    /// Rejected configuration: zero RAM budget, degenerate bloom geometry.
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl Error {
    /// Check if the error leaves the index usable.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::InvalidQuery { .. } => true,
            Error::InvariantViolation { .. } => true,
            Error::Configuration { .. } => true,
            Error::Io { .. } => false,
            Error::Corrupt { .. } => false,
        }
    }

    /// Get error code for monitoring
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::InvalidQuery { .. } => "INVALID_QUERY",
            Error::Io { .. } => "IO_ERROR",
            Error::Corrupt { .. } => "CORRUPT",
            Error::InvariantViolation { .. } => "INVARIANT_VIOLATION",
            Error::Configuration { .. } => "CONFIG_ERROR",
        }
    }

    /// Construct an [`Error::Io`] with a caller-supplied message.
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io { message: message.into(), source }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

/// Extension trait for attaching context to IO results
pub trait ResultExt<T> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| Error::io(f(), e))
    }
}
