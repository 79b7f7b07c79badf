//! Supported fingerprint algorithms.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HashError;

/// Fingerprint algorithm.
///
/// The set is closed: every variant maps to exactly one computation
/// strategy in the engine. Names outside the set are rejected when
/// parsed, never silently mapped to a default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HashAlgorithm {
    /// MD5 (salted).
    Md5,
    /// SHA-1 (salted).
    Sha1,
    /// SHA-256 (salted).
    Sha256,
    /// SHA-384 (salted).
    Sha384,
    /// SHA-512 (salted).
    Sha512,
    /// HMAC over SHA-1, keyed.
    HmacSha1,
    /// HMAC over SHA-256, keyed.
    HmacSha256,
    /// HMAC over SHA-512, keyed.
    HmacSha512,
    /// CRC-32 (IEEE), seeded from the key bytes.
    Crc32,
    /// CRC-16 (CCITT), seeded from the key bytes.
    Crc16,
}

impl HashAlgorithm {
    /// All supported algorithms.
    pub const ALL: [HashAlgorithm; 10] = [
        Self::Md5,
        Self::Sha1,
        Self::Sha256,
        Self::Sha384,
        Self::Sha512,
        Self::HmacSha1,
        Self::HmacSha256,
        Self::HmacSha512,
        Self::Crc32,
        Self::Crc16,
    ];

    /// Whether the secondary bytes are a key/seed (HMAC and CRC
    /// families) rather than a salt prefix.
    #[must_use]
    pub const fn uses_key(&self) -> bool {
        matches!(
            self,
            Self::HmacSha1 | Self::HmacSha256 | Self::HmacSha512 | Self::Crc32 | Self::Crc16
        )
    }

    /// Length in bytes of the finalized digest.
    #[must_use]
    pub const fn digest_len(&self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha1 | Self::HmacSha1 => 20,
            Self::Sha256 | Self::HmacSha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 | Self::HmacSha512 => 64,
            Self::Crc32 => 4,
            Self::Crc16 => 2,
        }
    }

    /// Canonical lowercase name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
            Self::HmacSha1 => "hmac-sha1",
            Self::HmacSha256 => "hmac-sha256",
            Self::HmacSha512 => "hmac-sha512",
            Self::Crc32 => "crc32",
            Self::Crc16 => "crc16",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();

        let algorithm = match normalized.as_str() {
            "md5" => Self::Md5,
            "sha1" => Self::Sha1,
            "sha256" => Self::Sha256,
            "sha384" => Self::Sha384,
            "sha512" => Self::Sha512,
            "hmacsha1" => Self::HmacSha1,
            "hmacsha256" => Self::HmacSha256,
            "hmacsha512" => Self::HmacSha512,
            "crc32" => Self::Crc32,
            "crc16" => Self::Crc16,
            _ => return Err(HashError::unsupported(s)),
        };
        Ok(algorithm)
    }
}

/// Decode a CRC-32 seed from key bytes (little-endian, zero padded).
#[must_use]
pub fn seed_u32(key: Option<&[u8]>) -> u32 {
    let mut buf = [0u8; 4];
    if let Some(key) = key {
        let n = key.len().min(4);
        buf[..n].copy_from_slice(&key[..n]);
    }
    u32::from_le_bytes(buf)
}

/// Decode a CRC-16 seed from key bytes (little-endian, zero padded).
#[must_use]
pub fn seed_u16(key: Option<&[u8]>) -> u16 {
    let mut buf = [0u8; 2];
    if let Some(key) = key {
        let n = key.len().min(2);
        buf[..n].copy_from_slice(&key[..n]);
    }
    u16::from_le_bytes(buf)
}
