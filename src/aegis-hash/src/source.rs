//! Byte sources the engine can fingerprint.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};

/// A readable byte source with a known logical length.
///
/// Sources that cannot reposition (for example [`DirectoryStream`]) report
/// `is_seekable() == false`; the engine refuses non-zero start offsets on
/// them instead of silently skipping bytes.
///
/// [`DirectoryStream`]: crate::DirectoryStream
pub trait HashSource: Read {
    /// Logical length of the source in bytes.
    fn byte_len(&mut self) -> io::Result<u64>;

    /// Whether [`HashSource::seek_to`] is supported.
    fn is_seekable(&self) -> bool;

    /// Move the read position to an absolute offset.
    fn seek_to(&mut self, offset: u64) -> io::Result<()>;
}

impl HashSource for File {
    fn byte_len(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset)).map(|_| ())
    }
}

impl<T: AsRef<[u8]>> HashSource for Cursor<T> {
    fn byte_len(&mut self) -> io::Result<u64> {
        Ok(self.get_ref().as_ref().len() as u64)
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        self.set_position(offset);
        Ok(())
    }
}
