//! Zip container holding one backup.
//!
//! Layout:
//! - `backup_metadata.json` - always the first entry
//! - `database.db` - raw store bytes
//! - `config.json` - UTF-8 configuration blob
//! - `images/<relative path>` and `videos/<relative path>` - media trees

pub mod metadata;
pub mod reader;
pub mod writer;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component as PathComponent, Path, PathBuf};

pub use metadata::{BackupMetadata, BackupType};
pub use reader::{read_metadata, ArchiveEntry, ArchiveReader};
pub use writer::ArchiveWriter;

pub const METADATA_ENTRY: &str = "backup_metadata.json";
pub const DATABASE_ENTRY: &str = "database.db";
pub const CONFIG_ENTRY: &str = "config.json";
pub const IMAGES_PREFIX: &str = "images/";
pub const VIDEOS_PREFIX: &str = "videos/";

/// One of the four parts of a backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Database,
    Config,
    Images,
    Videos,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Database => "database",
            Component::Config => "config",
            Component::Images => "images",
            Component::Videos => "videos",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Media tree kinds, each mapped to its own archive prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Images,
    Videos,
}

impl MediaKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            MediaKind::Images => IMAGES_PREFIX,
            MediaKind::Videos => VIDEOS_PREFIX,
        }
    }

    pub fn component(&self) -> Component {
        match self {
            MediaKind::Images => Component::Images,
            MediaKind::Videos => Component::Videos,
        }
    }

    /// Archive entry name for a file relative to the media root, or `None`
    /// when the path is not valid UTF-8 and cannot be named losslessly.
    ///
    /// Separators are normalized to `/` regardless of platform.
    pub fn entry_name(&self, relative_path: &Path) -> Option<String> {
        let mut parts = Vec::new();
        for component in relative_path.components() {
            if let PathComponent::Normal(part) = component {
                parts.push(part.to_str()?);
            }
        }
        Some(format!("{}{}", self.prefix(), parts.join("/")))
    }
}

/// What an entry name refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Metadata,
    Database,
    Config,
    /// Media file; carries the path relative to the media root
    Media(MediaKind, PathBuf),
}

impl EntryKind {
    /// Classify an entry name. `None` for anything this version does not
    /// understand, including media paths that would escape their root.
    pub fn classify(name: &str) -> Option<Self> {
        match name {
            METADATA_ENTRY => return Some(EntryKind::Metadata),
            DATABASE_ENTRY => return Some(EntryKind::Database),
            CONFIG_ENTRY => return Some(EntryKind::Config),
            _ => {}
        }

        let (kind, rest) = if let Some(rest) = name.strip_prefix(IMAGES_PREFIX) {
            (MediaKind::Images, rest)
        } else if let Some(rest) = name.strip_prefix(VIDEOS_PREFIX) {
            (MediaKind::Videos, rest)
        } else {
            return None;
        };

        safe_relative_path(rest).map(|path| EntryKind::Media(kind, path))
    }
}

/// Turn a `/`-separated archive path into a relative path that stays inside
/// its root. Rejects empty names, `.`/`..` segments and absolute paths.
fn safe_relative_path(name: &str) -> Option<PathBuf> {
    if name.is_empty() || name.starts_with('/') {
        return None;
    }

    let mut path = PathBuf::new();
    for segment in name.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." || !is_plain_segment(segment) {
            return None;
        }
        path.push(segment);
    }
    Some(path)
}

/// `\` and `:` are ordinary file name characters on Unix.
#[cfg(not(windows))]
fn is_plain_segment(_segment: &str) -> bool {
    true
}

/// On Windows `\` is a separator and `:` starts a drive prefix or stream.
#[cfg(windows)]
fn is_plain_segment(segment: &str) -> bool {
    !segment.contains('\\') && !segment.contains(':')
}
