//! Error types for verification operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during component verification and live
/// authentication.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// Fingerprint computation failed.
    #[error("Hash error: {0}")]
    Hash(#[from] aegis_hash::HashError),

    /// I/O failure outside the hash engine.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No manifest was found next to an authenticated path.
    #[error("No manifest found for {path:?}")]
    ManifestMissing {
        /// The path that required a manifest.
        path: PathBuf,
    },

    /// Manifest could not be read or parsed.
    #[error("Invalid manifest {path:?}: {reason}")]
    ManifestInvalid {
        /// The manifest file.
        path: PathBuf,
        /// Reason it was rejected.
        reason: String,
    },

    /// Manifest signature did not verify against the selected trust key.
    #[error("Signature rejected: {reason}")]
    SignatureRejected {
        /// Reason for rejection.
        reason: String,
    },

    /// The trust key a manifest asks for is not loaded.
    #[error("No {key_type} trust key is loaded")]
    KeyUnavailable {
        /// The requested key slot.
        key_type: String,
    },

    /// Live content did not match the signed expectation.
    #[error("Content of {path:?} does not match its signed hash")]
    HashMismatch {
        /// The path that failed.
        path: PathBuf,
    },

    /// Hardware device is not present.
    #[error("Device unavailable: {device}")]
    DeviceUnavailable {
        /// Device name.
        device: String,
    },

    /// Hardware device reported an error.
    #[error("Device {device} failed: {message}")]
    DeviceFailed {
        /// Device name.
        device: String,
        /// Device message.
        message: String,
    },

    /// Hardware device did not answer in time.
    #[error("Device {device} did not answer within {timeout_secs}s")]
    HardwareTimeout {
        /// Device name.
        device: String,
        /// Timeout that elapsed.
        timeout_secs: u64,
    },

    /// Component is not known to the catalog.
    #[error("Component not found: {id}")]
    ComponentNotFound {
        /// Component id.
        id: String,
    },

    /// Component cannot be mapped to a byte source.
    #[error("Unsupported component {id}: {reason}")]
    UnsupportedComponent {
        /// Component id.
        id: String,
        /// Why no byte source could be resolved.
        reason: String,
    },

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration error.
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Error message.
        message: String,
    },

    /// Unexpected internal failure (worker panic, poisoned lock).
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl VerifyError {
    /// Check if this error is a cancellation rather than a failure.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if this error must be treated as an authentication failure
    /// (drive the platform into lockup) rather than a fault.
    #[must_use]
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            Self::ManifestMissing { .. }
                | Self::ManifestInvalid { .. }
                | Self::SignatureRejected { .. }
                | Self::KeyUnavailable { .. }
                | Self::HashMismatch { .. }
                | Self::HardwareTimeout { .. }
        )
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
