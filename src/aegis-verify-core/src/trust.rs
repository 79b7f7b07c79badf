//! Trust keys for manifest signature verification.
//!
//! Two Ed25519 verifying keys are held: the system key (platform and OS
//! media) and the game key (game packages). A manifest's `key_type` tag
//! selects which one must have signed it. Keys are loaded once, when the
//! live monitor is constructed, and live until shutdown.

use std::fmt;
use std::path::Path;

use ed25519_dalek::{Signature, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::VerifyConfig;
use crate::error::VerifyError;

/// Seed of the bundled development signing key. Never trusted in
/// production profiles.
const DEVELOPMENT_SEED: [u8; 32] = *b"aegis-development-signing-key-01";

/// Key slot selected by a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    /// Platform / OS media.
    System,
    /// Game packages.
    Game,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => f.write_str("system"),
            Self::Game => f.write_str("game"),
        }
    }
}

/// The bundled development signing key.
#[must_use]
pub fn development_signing_key() -> SigningKey {
    SigningKey::from_bytes(&DEVELOPMENT_SEED)
}

/// Loaded trust keys.
#[derive(Debug, Clone, Default)]
pub struct TrustContext {
    system: Option<VerifyingKey>,
    game: Option<VerifyingKey>,
}

impl TrustContext {
    /// Context over explicit keys.
    #[must_use]
    pub fn new(system: Option<VerifyingKey>, game: Option<VerifyingKey>) -> Self {
        Self { system, game }
    }

    /// Context trusting only the development key in both slots.
    #[must_use]
    pub fn development() -> Self {
        let key = development_signing_key().verifying_key();
        Self::new(Some(key), Some(key))
    }

    /// Load keys from the configured files.
    ///
    /// A slot that cannot be loaded falls back to the development key in
    /// the development profile and stays empty otherwise, so manifests
    /// for that slot are rejected.
    pub fn load(config: &VerifyConfig) -> Self {
        let dev_fallback = !config.security_profile.is_production();
        let system = load_slot(KeyType::System, config.system_key_path.as_deref(), dev_fallback);
        let game = load_slot(KeyType::Game, config.game_key_path.as_deref(), dev_fallback);
        Self::new(system, game)
    }

    /// Key for `key_type`, if loaded.
    #[must_use]
    pub fn key(&self, key_type: KeyType) -> Option<&VerifyingKey> {
        match key_type {
            KeyType::System => self.system.as_ref(),
            KeyType::Game => self.game.as_ref(),
        }
    }

    /// Verify an Ed25519 signature over `message` with the `key_type` key.
    ///
    /// # Errors
    ///
    /// - [`VerifyError::KeyUnavailable`] if the slot is empty.
    /// - [`VerifyError::SignatureRejected`] if the signature is malformed or
    ///   does not verify.
    pub fn verify(
        &self,
        key_type: KeyType,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), VerifyError> {
        let key = self.key(key_type).ok_or_else(|| VerifyError::KeyUnavailable {
            key_type: key_type.to_string(),
        })?;

        let signature = Signature::from_slice(signature).map_err(|e| {
            VerifyError::SignatureRejected {
                reason: format!("malformed signature: {e}"),
            }
        })?;

        key.verify(message, &signature)
            .map_err(|_| VerifyError::SignatureRejected {
                reason: format!("signature does not verify against the {key_type} key"),
            })
    }
}

/// Read a verifying key file: 32 raw bytes, or 64 hex characters.
///
/// # Errors
///
/// Returns error if the file cannot be read or does not hold a valid key.
pub fn read_key_file(path: &Path) -> Result<VerifyingKey, VerifyError> {
    let data = std::fs::read(path)?;

    let bytes: Vec<u8> = if data.len() == 32 {
        data
    } else {
        let text = String::from_utf8_lossy(&data);
        hex::decode(text.trim()).map_err(|e| VerifyError::ConfigError {
            message: format!("Key file {} is not hex: {}", path.display(), e),
        })?
    };

    let array: [u8; 32] = bytes.as_slice().try_into().map_err(|_| VerifyError::ConfigError {
        message: format!(
            "Key file {} must hold 32 bytes, got {}",
            path.display(),
            bytes.len()
        ),
    })?;

    VerifyingKey::from_bytes(&array).map_err(|e| VerifyError::ConfigError {
        message: format!("Key file {} is not an Ed25519 key: {}", path.display(), e),
    })
}

fn load_slot(key_type: KeyType, path: Option<&Path>, dev_fallback: bool) -> Option<VerifyingKey> {
    if let Some(path) = path {
        match read_key_file(path) {
            Ok(key) => {
                info!(key_type = %key_type, path = ?path, "Loaded trust key");
                return Some(key);
            },
            Err(e) => error!(key_type = %key_type, path = ?path, error = %e, "Cannot load trust key"),
        }
    }

    if dev_fallback {
        warn!(key_type = %key_type, "Using bundled development trust key");
        Some(development_signing_key().verifying_key())
    } else {
        error!(key_type = %key_type, "No trust key; manifests for this slot will be rejected");
        None
    }
}
