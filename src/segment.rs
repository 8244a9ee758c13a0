//! Recording segment files.
//!
//! One `SegmentWriter` per session: append-only, flushed and closed exactly
//! once at rotation or shutdown. Also owns working-directory preparation at
//! startup (create if absent, clear leftover files).

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Append-only byte sink bound to one segment file.
pub struct SegmentWriter {
    path: PathBuf,
    file: File,
    bytes_written: u64,
}

/// A finished segment: its path and how many bytes reached the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedSegment {
    pub path: PathBuf,
    pub bytes: u64,
}

impl SegmentWriter {
    /// Create a new segment in `dir`, named from the capture-start timestamp
    /// (`output_<YYYYMMDD_HHMMSS>.ts`). Rotations within the same second
    /// would collide on the timestamp, so a sequence suffix disambiguates.
    pub fn create(dir: &Path) -> Result<Self, SegmentError> {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        let mut path = dir.join(format!("output_{}.ts", stamp));
        let mut seq = 1u32;

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    return Ok(SegmentWriter {
                        path,
                        file,
                        bytes_written: 0,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    seq += 1;
                    path = dir.join(format!("output_{}_{}.ts", stamp, seq));
                }
                Err(e) => {
                    return Err(SegmentError::CreateFailed { path, source: e });
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Append one captured chunk. A short write means the segment can no
    /// longer be trusted to be gap-free and is fatal for the session.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), SegmentError> {
        let written = self.file.write(bytes).map_err(|e| SegmentError::WriteFailed {
            path: self.path.clone(),
            source: e,
        })?;
        if written != bytes.len() {
            return Err(SegmentError::ShortWrite {
                path: self.path.clone(),
                written,
                expected: bytes.len(),
            });
        }
        self.bytes_written += written as u64;
        Ok(())
    }

    /// Flush and close the segment. Flush errors are logged rather than
    /// propagated: whatever reached the file is preserved and handed on.
    pub fn finish(mut self) -> ClosedSegment {
        if let Err(e) = self.file.flush() {
            log::warn!("flush of segment '{}' failed: {}", self.path.display(), e);
        }
        ClosedSegment {
            path: self.path,
            bytes: self.bytes_written,
        }
    }
}

/// Create the working directory if needed and delete leftover regular files
/// from earlier runs. Leftover segments are discarded, never resumed.
pub fn prepare_workdir(dir: &Path) -> Result<usize, SegmentError> {
    std::fs::create_dir_all(dir).map_err(|e| SegmentError::WorkdirFailed {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let entries = std::fs::read_dir(dir).map_err(|e| SegmentError::WorkdirFailed {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut removed = 0;
    for entry in entries.flatten() {
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if !is_file {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => {
                log::warn!(
                    "could not remove leftover file '{}': {}",
                    entry.path().display(),
                    e
                );
            }
        }
    }
    Ok(removed)
}

/// Errors from segment-file handling.
#[derive(Debug)]
pub enum SegmentError {
    /// Working directory could not be created or listed
    WorkdirFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Segment file could not be created
    CreateFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Appending to the segment failed
    WriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The file accepted fewer bytes than were captured
    ShortWrite {
        path: PathBuf,
        written: usize,
        expected: usize,
    },
}

impl std::fmt::Display for SegmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SegmentError::WorkdirFailed { path, source } => {
                write!(
                    f,
                    "Failed to prepare working directory '{}': {}",
                    path.display(),
                    source
                )
            }
            SegmentError::CreateFailed { path, source } => {
                write!(
                    f,
                    "Failed to create segment file '{}': {}",
                    path.display(),
                    source
                )
            }
            SegmentError::WriteFailed { path, source } => {
                write!(
                    f,
                    "Failed to write to segment file '{}': {}",
                    path.display(),
                    source
                )
            }
            SegmentError::ShortWrite {
                path,
                written,
                expected,
            } => {
                write!(
                    f,
                    "Short write to segment file '{}': {} of {} bytes",
                    path.display(),
                    written,
                    expected
                )
            }
        }
    }
}

impl std::error::Error for SegmentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SegmentError::WorkdirFailed { source, .. }
            | SegmentError::CreateFailed { source, .. }
            | SegmentError::WriteFailed { source, .. } => Some(source),
            SegmentError::ShortWrite { .. } => None,
        }
    }
}
