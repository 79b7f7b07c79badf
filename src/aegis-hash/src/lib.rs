//! # aegis-hash
//!
//! Streaming fingerprint engine for installed software and firmware.
//!
//! - **Algorithms**: MD5, SHA-1/256/384/512 (salted), HMAC-SHA1/256/512
//!   (keyed), CRC-32 and CRC-16 (seeded). The set is a closed enum; names
//!   outside it fail with [`HashError::UnsupportedAlgorithm`].
//! - **Sources**: anything implementing [`HashSource`]: files, in-memory
//!   buffers, and [`DirectoryStream`], which concatenates an ordered file
//!   set into one forward-only stream.
//! - **Windows**: arbitrary byte ranges, including wrap-around windows
//!   where the end offset precedes the start offset.
//!
//! ```rust,ignore
//! use aegis_hash::{compute_hash, HashAlgorithm, HashParameters};
//!
//! let mut file = std::fs::File::open("game.bin")?;
//! let digest = compute_hash(&mut file, &HashParameters::new(HashAlgorithm::Sha256))?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod algorithm;
mod crc16;
mod directory;
mod engine;
mod error;
pub mod ordering;
mod source;

pub use algorithm::{seed_u16, seed_u32, HashAlgorithm};
pub use crc16::Crc16;
pub use directory::{enumerate_files, DirectoryStream, FileSelection};
pub use engine::{compute_hash, verify_hash, HashParameters, BLOCK_SIZE};
pub use error::HashError;
pub use source::HashSource;

/// Constant-time byte comparison.
///
/// Used for every digest comparison so that a mismatch position cannot be
/// inferred from timing. Length is compared first and is not secret.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;

    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
