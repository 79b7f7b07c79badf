//! Hash engine error types.

use thiserror::Error;

/// Errors that can occur while fingerprinting a byte source.
#[derive(Debug, Error)]
pub enum HashError {
    /// A non-zero start offset was requested on a forward-only source.
    #[error("Source is not seekable; cannot start hashing at offset {offset}")]
    NotSeekable {
        /// The requested start offset.
        offset: u64,
    },

    /// An offset lies beyond the end of the source.
    #[error("{which} offset {offset} exceeds source length {length}")]
    OffsetOutOfRange {
        /// Which offset was rejected ("start" or "end").
        which: &'static str,
        /// The rejected offset.
        offset: u64,
        /// Length of the source at the time of the call.
        length: u64,
    },

    /// Algorithm name is not part of the supported set.
    #[error("Algorithm not supported: {algorithm}")]
    UnsupportedAlgorithm {
        /// The unsupported algorithm name.
        algorithm: String,
    },

    /// HMAC key could not be used.
    #[error("Invalid key: {reason}")]
    InvalidKey {
        /// Reason the key was rejected.
        reason: String,
    },

    /// A file selection pattern could not be parsed.
    #[error("Invalid file pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Parser message.
        reason: String,
    },

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HashError {
    /// Create an unsupported algorithm error.
    #[must_use]
    pub fn unsupported(algorithm: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm {
            algorithm: algorithm.into(),
        }
    }

    /// Check if this error was caused by caller-supplied parameters
    /// rather than by the source itself.
    #[must_use]
    pub fn is_parameter_error(&self) -> bool {
        matches!(
            self,
            Self::NotSeekable { .. }
                | Self::OffsetOutOfRange { .. }
                | Self::UnsupportedAlgorithm { .. }
                | Self::InvalidKey { .. }
                | Self::InvalidPattern { .. }
        )
    }
}
