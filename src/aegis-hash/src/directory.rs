//! Multi-file sequential stream.
//!
//! Presents an ordered list of files as one forward-only byte stream so a
//! directory (or any file set) can be fingerprinted as a single unit.
//! Member files are opened lazily, one at a time, and the open handle is
//! released as soon as the member is exhausted or the stream is dropped.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use tracing::{debug, trace};

use crate::error::HashError;
use crate::ordering::sort_paths;
use crate::source::HashSource;

/// Which files a directory enumeration picks up.
#[derive(Debug, Clone, Default)]
pub struct FileSelection {
    /// Descend into subdirectories.
    pub recursive: bool,
    /// Extensions (without the dot) that are never included. Case-insensitive.
    pub excluded_extensions: Vec<String>,
    /// Folder names that are never entered. Case-insensitive.
    pub excluded_folders: Vec<String>,
}

impl FileSelection {
    /// Select every file below the directory.
    #[must_use]
    pub fn recursive() -> Self {
        Self {
            recursive: true,
            ..Self::default()
        }
    }

    /// Exclude files with these extensions.
    #[must_use]
    pub fn excluding_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Skip folders with these names.
    #[must_use]
    pub fn excluding_folders<I, S>(mut self, folders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_folders = folders.into_iter().map(Into::into).collect();
        self
    }

    fn excludes_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                self.excluded_extensions
                    .iter()
                    .any(|x| x.trim_start_matches('.').eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }

    fn excludes_folder(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|name| self.excluded_folders.iter().any(|x| x.eq_ignore_ascii_case(name)))
            .unwrap_or(false)
    }
}

/// List the files under `dir` whose names match any of `patterns`, in
/// fingerprint order.
///
/// # Errors
///
/// Returns an error if a pattern is malformed or a directory cannot be read.
pub fn enumerate_files(
    dir: &Path,
    patterns: &[&str],
    selection: &FileSelection,
) -> Result<Vec<PathBuf>, HashError> {
    let patterns = patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| HashError::InvalidPattern {
                pattern: (*p).to_string(),
                reason: e.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut files = Vec::new();
    collect(dir, &patterns, selection, &mut files)?;
    sort_paths(&mut files);

    debug!(dir = ?dir, files = files.len(), "Enumerated files for fingerprint");
    Ok(files)
}

fn collect(
    dir: &Path,
    patterns: &[Pattern],
    selection: &FileSelection,
    files: &mut Vec<PathBuf>,
) -> Result<(), HashError> {
    let options = MatchOptions {
        case_sensitive: false,
        ..MatchOptions::default()
    };

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();

        if path.is_dir() {
            if selection.recursive && !selection.excludes_folder(&path) {
                collect(&path, patterns, selection, files)?;
            }
            continue;
        }

        if selection.excludes_file(&path) {
            trace!(path = ?path, "Skipping excluded extension");
            continue;
        }

        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => continue,
        };
        if patterns.iter().any(|p| p.matches_with(name, options)) {
            files.push(path);
        }
    }

    Ok(())
}

/// Forward-only stream over the concatenated contents of several files.
#[derive(Debug)]
pub struct DirectoryStream {
    files: Vec<PathBuf>,
    next: usize,
    current: Option<File>,
    length: u64,
}

impl DirectoryStream {
    /// Build a stream over `files` in the given order.
    ///
    /// # Errors
    ///
    /// Returns an error if the size of any member cannot be read.
    pub fn new(files: Vec<PathBuf>) -> Result<Self, HashError> {
        let mut length = 0u64;
        for file in &files {
            length += fs::metadata(file)?.len();
        }

        Ok(Self {
            files,
            next: 0,
            current: None,
            length,
        })
    }

    /// Build a stream over the matching files of a directory, in
    /// fingerprint order (see [`crate::ordering`]).
    ///
    /// # Errors
    ///
    /// Returns an error if enumeration fails or a member cannot be sized.
    pub fn from_directory(
        dir: &Path,
        patterns: &[&str],
        selection: &FileSelection,
    ) -> Result<Self, HashError> {
        Self::new(enumerate_files(dir, patterns, selection)?)
    }

    /// Member files, in stream order.
    #[must_use]
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Reported logical length.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.length
    }

    /// Whether the stream reports zero length.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Overwrite the reported logical length.
    ///
    /// Only the reported value changes; member content is not truncated
    /// and reads still return every member byte.
    pub fn set_length(&mut self, length: u64) {
        self.length = length;
    }
}

impl Read for DirectoryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            if self.current.is_none() {
                let Some(path) = self.files.get(self.next) else {
                    return Ok(0);
                };
                trace!(path = ?path, "Opening stream member");
                self.current = Some(File::open(path)?);
                self.next += 1;
            }

            if let Some(file) = self.current.as_mut() {
                let n = file.read(buf)?;
                if n > 0 {
                    return Ok(n);
                }
            }
            // member exhausted: close it before moving on
            self.current = None;
        }
    }
}

impl Seek for DirectoryStream {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "DirectoryStream is not seekable",
        ))
    }
}

impl HashSource for DirectoryStream {
    fn byte_len(&mut self) -> io::Result<u64> {
        Ok(self.length)
    }

    fn is_seekable(&self) -> bool {
        false
    }

    fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset)).map(|_| ())
    }
}
