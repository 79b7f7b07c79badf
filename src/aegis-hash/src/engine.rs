//! Streaming hash computation.
//!
//! ## Byte windows
//!
//! A computation covers the window `[start_offset, end_offset)` of the
//! source. `end_offset` of `None` (end of stream) or `Some(0)` means "to
//! the current length", and a start offset equal to the length wraps to 0.
//!
//! When `end_offset <= start_offset` the window wraps around: the engine
//! hashes from `start_offset` to the physical end, seeks back to 0 once,
//! and continues up to `end_offset`, all through one hash context. This is
//! how a logical region straddling a circular partition layout is
//! fingerprinted.

use std::io::{ErrorKind, Read};

use hmac::{Hmac, Mac};
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use tracing::trace;

use crate::algorithm::{seed_u16, seed_u32, HashAlgorithm};
use crate::crc16::Crc16;
use crate::error::HashError;
use crate::source::HashSource;

/// Read block size.
pub const BLOCK_SIZE: usize = 8 * 1024;

/// Parameters of one fingerprint computation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashParameters {
    /// Algorithm to run.
    pub algorithm: HashAlgorithm,
    /// Pre-image prefix for the plain digest family.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<Vec<u8>>,
    /// HMAC key, or CRC seed bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Vec<u8>>,
    /// First byte of the window.
    #[serde(default)]
    pub start_offset: u64,
    /// End of the window; `None` hashes to the end of the stream.
    #[serde(default)]
    pub end_offset: Option<u64>,
}

impl HashParameters {
    /// Whole-stream parameters for `algorithm` with no salt or key.
    #[must_use]
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            salt: None,
            key: None,
            start_offset: 0,
            end_offset: None,
        }
    }

    /// Set the salt prefix.
    #[must_use]
    pub fn with_salt(mut self, salt: impl Into<Vec<u8>>) -> Self {
        self.salt = Some(salt.into());
        self
    }

    /// Set the HMAC key or CRC seed bytes.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set the secondary bytes in whichever slot the algorithm uses.
    #[must_use]
    pub fn with_seed_or_salt(self, bytes: Option<Vec<u8>>) -> Self {
        match bytes {
            Some(bytes) if self.algorithm.uses_key() => self.with_key(bytes),
            Some(bytes) => self.with_salt(bytes),
            None => self,
        }
    }

    /// Set the window offsets.
    #[must_use]
    pub fn with_range(mut self, start_offset: u64, end_offset: Option<u64>) -> Self {
        self.start_offset = start_offset;
        self.end_offset = end_offset;
        self
    }
}

/// Closed dispatch over the supported algorithms.
enum Digester {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
    HmacSha1(Hmac<Sha1>),
    HmacSha256(Hmac<Sha256>),
    HmacSha512(Hmac<Sha512>),
    Crc32(crc32fast::Hasher),
    Crc16(Crc16),
}

impl Digester {
    fn new(params: &HashParameters) -> Result<Self, HashError> {
        let salt = params.salt.as_deref().unwrap_or_default();
        let key = params.key.as_deref().unwrap_or_default();

        let digester = match params.algorithm {
            HashAlgorithm::Md5 => Self::Md5(salted(salt)),
            HashAlgorithm::Sha1 => Self::Sha1(salted(salt)),
            HashAlgorithm::Sha256 => Self::Sha256(salted(salt)),
            HashAlgorithm::Sha384 => Self::Sha384(salted(salt)),
            HashAlgorithm::Sha512 => Self::Sha512(salted(salt)),
            HashAlgorithm::HmacSha1 => Self::HmacSha1(keyed(key)?),
            HashAlgorithm::HmacSha256 => Self::HmacSha256(keyed(key)?),
            HashAlgorithm::HmacSha512 => Self::HmacSha512(keyed(key)?),
            HashAlgorithm::Crc32 => {
                Self::Crc32(crc32fast::Hasher::new_with_initial(seed_u32(params.key.as_deref())))
            },
            HashAlgorithm::Crc16 => Self::Crc16(Crc16::new(seed_u16(params.key.as_deref()))),
        };
        Ok(digester)
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(h) => h.update(data),
            Self::Sha1(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::Sha384(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
            Self::HmacSha1(h) => h.update(data),
            Self::HmacSha256(h) => h.update(data),
            Self::HmacSha512(h) => h.update(data),
            Self::Crc32(h) => h.update(data),
            Self::Crc16(h) => h.update(data),
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            Self::Md5(h) => h.finalize().to_vec(),
            Self::Sha1(h) => h.finalize().to_vec(),
            Self::Sha256(h) => h.finalize().to_vec(),
            Self::Sha384(h) => h.finalize().to_vec(),
            Self::Sha512(h) => h.finalize().to_vec(),
            Self::HmacSha1(h) => h.finalize().into_bytes().to_vec(),
            Self::HmacSha256(h) => h.finalize().into_bytes().to_vec(),
            Self::HmacSha512(h) => h.finalize().into_bytes().to_vec(),
            Self::Crc32(h) => h.finalize().to_be_bytes().to_vec(),
            Self::Crc16(h) => h.finalize().to_vec(),
        }
    }
}

fn salted<D: Digest>(salt: &[u8]) -> D {
    let mut digest = D::new();
    if !salt.is_empty() {
        digest.update(salt);
    }
    digest
}

fn keyed<M: Mac + hmac::digest::KeyInit>(key: &[u8]) -> Result<M, HashError> {
    <M as Mac>::new_from_slice(key).map_err(|e| HashError::InvalidKey {
        reason: e.to_string(),
    })
}

/// Hash a window of `source` with the given parameters.
///
/// # Errors
///
/// - [`HashError::OffsetOutOfRange`] if either offset exceeds the length.
/// - [`HashError::NotSeekable`] for a non-zero start on a forward-only source.
/// - [`HashError::Io`] if reading fails.
pub fn compute_hash<S>(source: &mut S, params: &HashParameters) -> Result<Vec<u8>, HashError>
where
    S: HashSource + ?Sized,
{
    let length = source.byte_len()?;

    if params.start_offset > length {
        return Err(HashError::OffsetOutOfRange {
            which: "start",
            offset: params.start_offset,
            length,
        });
    }
    if let Some(end) = params.end_offset {
        if end > length {
            return Err(HashError::OffsetOutOfRange {
                which: "end",
                offset: end,
                length,
            });
        }
    }

    let start = if params.start_offset == length {
        0
    } else {
        params.start_offset
    };
    if start > 0 && !source.is_seekable() {
        return Err(HashError::NotSeekable { offset: start });
    }
    let end = match params.end_offset {
        None | Some(0) => length,
        Some(end) => end,
    };

    let mut digester = Digester::new(params)?;
    let mut buf = vec![0u8; BLOCK_SIZE];

    if start > 0 {
        source.seek_to(start)?;
    }

    let hashed = if end > start {
        feed(source, &mut digester, end - start, &mut buf)?
    } else {
        let tail = feed(source, &mut digester, length - start, &mut buf)?;
        // wrap once to the head of the stream
        let head = if end > 0 {
            source.seek_to(0)?;
            feed(source, &mut digester, end, &mut buf)?
        } else {
            0
        };
        tail + head
    };

    trace!(
        algorithm = %params.algorithm,
        start,
        end,
        length,
        hashed,
        "Hash window complete"
    );

    Ok(digester.finalize())
}

/// Recompute the digest of `source` and compare it to `expected` in
/// constant time.
///
/// # Errors
///
/// Same conditions as [`compute_hash`].
pub fn verify_hash<S>(
    expected: &[u8],
    source: &mut S,
    params: &HashParameters,
) -> Result<bool, HashError>
where
    S: HashSource + ?Sized,
{
    let actual = compute_hash(source, params)?;
    Ok(crate::constant_time_eq(&actual, expected))
}

/// Feed up to `count` bytes into the digester, stopping early if the
/// source runs dry. Returns the number of bytes hashed.
fn feed<S>(
    source: &mut S,
    digester: &mut Digester,
    count: u64,
    buf: &mut [u8],
) -> Result<u64, HashError>
where
    S: HashSource + ?Sized,
{
    let mut remaining = count;
    while remaining > 0 {
        let want = usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len()));
        let n = match source.read(&mut buf[..want]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        digester.update(&buf[..n]);
        remaining -= n as u64;
    }
    Ok(count - remaining)
}
