//! Sequential archive reader.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use tracing::warn;
use zip::ZipArchive;

use super::metadata::BackupMetadata;
use super::{EntryKind, METADATA_ENTRY};
use crate::utils::errors::{BackupError, Result};

/// Upper bound for the metadata entry; anything larger is not ours.
const MAX_METADATA_SIZE: u64 = 1024 * 1024;

/// An entry yielded by [`ArchiveReader::next_entry`]. Reads decompressed
/// content; the underlying handle is released when the entry is dropped.
pub struct ArchiveEntry<'a> {
    pub name: String,
    pub kind: EntryKind,
    /// Uncompressed size as recorded in the archive
    pub size: u64,
    content: Box<dyn Read + 'a>,
}

impl Read for ArchiveEntry<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.content.read(buf)
    }
}

pub struct ArchiveReader {
    path: PathBuf,
    archive: ZipArchive<BufReader<File>>,
    metadata: BackupMetadata,
    cursor: usize,
}

impl ArchiveReader {
    /// Open an archive and validate its metadata entry.
    pub fn open(path: &Path) -> Result<Self> {
        let mut archive = open_zip(path)?;
        let metadata = parse_metadata(path, &mut archive)?;

        Ok(Self {
            path: path.to_path_buf(),
            archive,
            metadata,
            cursor: 0,
        })
    }

    pub fn metadata(&self) -> &BackupMetadata {
        &self.metadata
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries whose name starts with `prefix`.
    pub fn count_with_prefix(&self, prefix: &str) -> usize {
        self.archive
            .file_names()
            .filter(|name| name.starts_with(prefix) && !name.ends_with('/'))
            .count()
    }

    /// Yield the next recognized entry in archive order, or `None` once the
    /// archive is exhausted. Directory entries and unknown names are skipped.
    pub fn next_entry(&mut self) -> Result<Option<ArchiveEntry<'_>>> {
        let (index, name, kind) = loop {
            if self.cursor >= self.archive.len() {
                return Ok(None);
            }
            let index = self.cursor;
            self.cursor += 1;

            let (name, is_dir) = {
                let raw = self
                    .archive
                    .by_index_raw(index)
                    .map_err(|e| BackupError::read_failure(format!("entry #{}", index), e))?;
                (raw.name().to_string(), raw.is_dir())
            };
            if is_dir {
                continue;
            }

            match EntryKind::classify(&name) {
                Some(kind) => break (index, name, kind),
                None => {
                    warn!(archive = %self.path.display(), entry = %name, "Skipping unrecognized archive entry");
                }
            }
        };

        let file = self
            .archive
            .by_index(index)
            .map_err(|e| BackupError::read_failure(name.clone(), e))?;
        let size = file.size();

        Ok(Some(ArchiveEntry {
            name,
            kind,
            size,
            content: Box::new(file),
        }))
    }
}

/// Read only the metadata entry of an archive.
pub fn read_metadata(path: &Path) -> Result<BackupMetadata> {
    let mut archive = open_zip(path)?;
    parse_metadata(path, &mut archive)
}

fn open_zip(path: &Path) -> Result<ZipArchive<BufReader<File>>> {
    let file = File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => BackupError::ArchiveNotFound(path.to_path_buf()),
        _ => BackupError::read_failure(format!("open {}", path.display()), e),
    })?;

    ZipArchive::new(BufReader::new(file)).map_err(|e| BackupError::corrupt(path, e))
}

fn parse_metadata(path: &Path, archive: &mut ZipArchive<BufReader<File>>) -> Result<BackupMetadata> {
    let mut entry = archive
        .by_name(METADATA_ENTRY)
        .map_err(|e| BackupError::corrupt(path, format!("missing {}: {}", METADATA_ENTRY, e)))?;

    let mut json = Vec::new();
    entry
        .by_ref()
        .take(MAX_METADATA_SIZE)
        .read_to_end(&mut json)
        .map_err(|e| BackupError::corrupt(path, e))?;

    BackupMetadata::from_json(&json).map_err(|e| BackupError::corrupt(path, e))
}
