//! Signed image manifests.
//!
//! A manifest sits next to the media it describes (`<parent>/<stem>.manifest`)
//! and declares the expected content digest of that media, signed with
//! either the system or the game key:
//!
//! ```json
//! {
//!   "name": "blackjack",
//!   "version": "1.4.0",
//!   "key_type": "game",
//!   "hash": "<base64 SHA1 of the ordered content>",
//!   "signature": "<base64 Ed25519 over name\nversion\nkey_type\nhash>"
//! }
//! ```

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use aegis_hash::{compute_hash, DirectoryStream, FileSelection, HashAlgorithm, HashParameters};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signer, SigningKey};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::error::VerifyError;
use crate::trust::{KeyType, TrustContext};

/// File extension of image manifests.
pub const MANIFEST_EXTENSION: &str = "manifest";

/// Extensions never included in a content digest.
pub const EXCLUDED_EXTENSIONS: &[&str] = &[MANIFEST_EXTENSION, "sig", "log", "tmp", "lock"];

/// Folders never descended into by a content digest.
pub const EXCLUDED_FOLDERS: &[&str] = &[
    "logs",
    "temp",
    "lost+found",
    "System Volume Information",
    "$RECYCLE.BIN",
];

/// A signed image manifest, as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageManifest {
    /// Image name.
    pub name: String,
    /// Image version.
    pub version: String,
    /// Key that signed this manifest.
    pub key_type: KeyType,
    /// Expected content digest (base64 SHA1).
    pub hash: String,
    /// Base64 Ed25519 signature over [`ImageManifest::signing_payload`].
    pub signature: String,
}

impl ImageManifest {
    /// Build and sign a manifest.
    #[must_use]
    pub fn sign(
        name: impl Into<String>,
        version: impl Into<String>,
        key_type: KeyType,
        hash: impl Into<String>,
        key: &SigningKey,
    ) -> Self {
        let mut manifest = Self {
            name: name.into(),
            version: version.into(),
            key_type,
            hash: hash.into(),
            signature: String::new(),
        };
        let signature = key.sign(&manifest.signing_payload());
        manifest.signature = BASE64.encode(signature.to_bytes());
        manifest
    }

    /// Bytes covered by the signature.
    #[must_use]
    pub fn signing_payload(&self) -> Vec<u8> {
        format!(
            "{}\n{}\n{}\n{}",
            self.name, self.version, self.key_type, self.hash
        )
        .into_bytes()
    }

    /// Read a manifest file.
    ///
    /// # Errors
    ///
    /// [`VerifyError::ManifestMissing`] if the file does not exist,
    /// [`VerifyError::ManifestInvalid`] if it is not a manifest.
    pub fn read(path: &Path) -> Result<Self, VerifyError> {
        let data = std::fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VerifyError::ManifestMissing {
                    path: path.to_path_buf(),
                }
            } else {
                VerifyError::Io(e)
            }
        })?;

        serde_json::from_slice(&data).map_err(|e| VerifyError::ManifestInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Write the manifest as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written.
    pub fn write(&self, path: &Path) -> Result<(), VerifyError> {
        let json = serde_json::to_vec_pretty(self).map_err(|e| VerifyError::internal(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Check the signature against the key selected by `key_type`.
    ///
    /// # Errors
    ///
    /// Returns error if the key is unavailable or the signature is rejected.
    pub fn verify(&self, trust: &TrustContext) -> Result<(), VerifyError> {
        let signature = BASE64
            .decode(self.signature.trim())
            .map_err(|e| VerifyError::SignatureRejected {
                reason: format!("signature is not base64: {e}"),
            })?;
        trust.verify(self.key_type, &self.signing_payload(), &signature)
    }
}

/// Outcome of reading and verifying a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedManifest {
    /// Key that signed it.
    pub key_type: KeyType,
    /// Expected content digest.
    pub expected_hash: String,
}

/// Read the manifest at `path` and verify its signature.
///
/// # Errors
///
/// Returns error if the manifest is missing, malformed, or not signed by a
/// trusted key.
#[instrument(skip(trust))]
pub fn read_verified(path: &Path, trust: &TrustContext) -> Result<VerifiedManifest, VerifyError> {
    let manifest = ImageManifest::read(path)?;
    manifest.verify(trust)?;
    debug!(name = %manifest.name, version = %manifest.version, key_type = %manifest.key_type, "Manifest verified");
    Ok(VerifiedManifest {
        key_type: manifest.key_type,
        expected_hash: manifest.hash,
    })
}

/// Locate the manifest beside `path`: `<parent>/<stem>.manifest`, with the
/// extension matched case-insensitively.
#[must_use]
pub fn find_sibling_manifest(path: &Path) -> Option<PathBuf> {
    let parent = path.parent()?;
    let stem = path.file_stem()?;

    let mut name = stem.to_os_string();
    name.push(".");
    name.push(MANIFEST_EXTENSION);
    let exact = parent.join(name);
    if exact.is_file() {
        return Some(exact);
    }

    let entries = std::fs::read_dir(parent).ok()?;
    entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .find(|candidate| {
            candidate.is_file()
                && candidate.file_stem() == Some(stem)
                && is_manifest(candidate)
        })
}

/// The most recently modified manifest in `dir`.
#[must_use]
pub fn newest_manifest(dir: &Path) -> Option<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = ?dir, error = %e, "Cannot read manifest directory");
            return None;
        },
    };

    entries
        .filter_map(Result::ok)
        .filter(|entry| is_manifest(&entry.path()))
        .map(|entry| {
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, entry.path())
        })
        .max()
        .map(|(_, path)| path)
}

/// Base64 SHA1 of the content at `path`.
///
/// Directories are hashed as one ordered stream of their files, skipping
/// [`EXCLUDED_EXTENSIONS`] and [`EXCLUDED_FOLDERS`].
///
/// # Errors
///
/// Returns error if the content cannot be read.
pub fn content_digest(path: &Path) -> Result<String, VerifyError> {
    let params = HashParameters::new(HashAlgorithm::Sha1);

    let digest = if path.is_dir() {
        let selection = FileSelection::recursive()
            .excluding_extensions(EXCLUDED_EXTENSIONS.iter().copied())
            .excluding_folders(EXCLUDED_FOLDERS.iter().copied());
        let mut stream = DirectoryStream::from_directory(path, &["*"], &selection)?;
        compute_hash(&mut stream, &params)?
    } else {
        let mut file = File::open(path)?;
        compute_hash(&mut file, &params)?
    };

    Ok(BASE64.encode(digest))
}

fn is_manifest(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(MANIFEST_EXTENSION))
        .unwrap_or(false)
}
