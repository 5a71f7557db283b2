//! Streaming archive writer.
//!
//! Entries are written into a temporary file next to the final location and
//! only renamed into place by [`ArchiveWriter::finish`]. Dropping a writer
//! that was not finished deletes the temporary file.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::metadata::BackupMetadata;
use super::{METADATA_ENTRY, IMAGES_PREFIX, VIDEOS_PREFIX};
use crate::utils::errors::{BackupError, Result};

/// Read buffer for streaming entry content
const CHUNK_SIZE: usize = 64 * 1024;

/// Entries above this size need zip64 headers
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

pub struct ArchiveWriter {
    zip: ZipWriter<BufWriter<NamedTempFile>>,
    names: HashSet<String>,
    metadata_written: bool,
    bytes_written: u64,
}

impl ArchiveWriter {
    /// Start a new archive in `dir` (the directory must exist).
    pub fn create_in(dir: &Path) -> Result<Self> {
        let temp = tempfile::Builder::new()
            .prefix(".shuigong_partial_")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(|e| BackupError::write_failure(format!("create temp file in {}", dir.display()), e))?;

        debug!("Writing archive to temporary file {}", temp.path().display());

        Ok(Self {
            zip: ZipWriter::new(BufWriter::new(temp)),
            names: HashSet::new(),
            metadata_written: false,
            bytes_written: 0,
        })
    }

    /// Write the metadata entry. Must be the first call and happen once.
    pub fn write_metadata(&mut self, metadata: &BackupMetadata) -> Result<()> {
        if self.metadata_written {
            return Err(BackupError::write_failure(METADATA_ENTRY, "metadata entry already written"));
        }

        let json = metadata
            .to_json()
            .map_err(|e| BackupError::write_failure(METADATA_ENTRY, e))?;
        self.start_entry(METADATA_ENTRY, json.len() as u64)?;
        self.zip
            .write_all(&json)
            .map_err(|e| BackupError::write_failure(METADATA_ENTRY, e))?;

        self.metadata_written = true;
        self.bytes_written += json.len() as u64;
        Ok(())
    }

    /// Stream `reader` into a new entry called `name`.
    ///
    /// `size_hint` only selects zip64 headers for very large entries; the
    /// content is never buffered whole. Returns the number of bytes copied.
    pub fn write_entry(&mut self, name: &str, reader: &mut dyn Read, size_hint: u64) -> Result<u64> {
        if !self.metadata_written {
            return Err(BackupError::write_failure(name, "metadata entry must be written first"));
        }
        if name == METADATA_ENTRY {
            return Err(BackupError::write_failure(name, "reserved entry name"));
        }

        self.start_entry(name, size_hint)?;

        let mut reader = BufReader::with_capacity(CHUNK_SIZE, reader);
        let copied = io::copy(&mut reader, &mut self.zip)
            .map_err(|e| BackupError::write_failure(name, e))?;

        self.bytes_written += copied;
        debug!("Archived {} ({} bytes)", name, copied);
        Ok(copied)
    }

    /// Stream a file from disk into a new entry.
    pub fn write_file(&mut self, name: &str, path: &Path) -> Result<u64> {
        let mut file = File::open(path)
            .map_err(|e| BackupError::write_failure(format!("open {}", path.display()), e))?;
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);
        self.write_entry(name, &mut file, size)
    }

    /// Uncompressed bytes written so far, metadata included.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Finalize the container and atomically move it to `target`.
    ///
    /// Fails without touching `target` if it already exists.
    pub fn finish(self, target: &Path) -> Result<PathBuf> {
        if !self.metadata_written {
            return Err(BackupError::write_failure(METADATA_ENTRY, "archive has no metadata entry"));
        }

        let buffered = self
            .zip
            .finish()
            .map_err(|e| BackupError::write_failure("finalize archive", e))?;
        let temp = buffered
            .into_inner()
            .map_err(|e| BackupError::write_failure("flush archive", e.into_error()))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| BackupError::write_failure("sync archive", e))?;

        temp.persist_noclobber(target)
            .map_err(|e| BackupError::write_failure(format!("rename to {}", target.display()), e.error))?;

        Ok(target.to_path_buf())
    }

    fn start_entry(&mut self, name: &str, size_hint: u64) -> Result<()> {
        if !self.names.insert(name.to_string()) {
            return Err(BackupError::write_failure(name, "duplicate entry name"));
        }

        // Photos and videos are already compressed
        let method = if name.starts_with(IMAGES_PREFIX) || name.starts_with(VIDEOS_PREFIX) {
            CompressionMethod::Stored
        } else {
            CompressionMethod::Deflated
        };
        let options = SimpleFileOptions::default()
            .compression_method(method)
            .unix_permissions(0o644)
            .large_file(size_hint >= ZIP64_THRESHOLD);

        self.zip
            .start_file(name, options)
            .map_err(|e| BackupError::write_failure(name, e))
    }
}
