//! Media tree traversal.
//!
//! Collects regular files under a media root together with their path
//! relative to that root, which becomes the archive entry name.

use std::path::Path;
use walkdir::{DirEntry, WalkDir};

use crate::sources::MediaFile;

/// Options for directory walking
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Follow symbolic links
    pub follow_links: bool,

    /// Maximum depth (None = unlimited)
    pub max_depth: Option<usize>,

    /// File names to skip (exact match)
    pub exclude_names: Vec<String>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            follow_links: false,
            max_depth: None,
            exclude_names: vec![
                ".nomedia".to_string(),
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
            ],
        }
    }
}

/// Walk a media root and collect every regular file, sorted by relative path.
///
/// Symlinks are resolved when `follow_links` is set and skipped otherwise.
/// A root that does not exist yields an empty list.
pub fn walk_directory(root: &Path, options: &WalkOptions) -> std::io::Result<Vec<MediaFile>> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut walker = WalkDir::new(root)
        .follow_links(options.follow_links)
        .sort_by_file_name();

    if let Some(max_depth) = options.max_depth {
        walker = walker.max_depth(max_depth);
    }

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry?;

        if should_exclude(&entry, &options.exclude_names) || !entry.file_type().is_file() {
            continue;
        }

        let relative_path = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_path_buf();

        files.push(MediaFile {
            path: entry.path().to_path_buf(),
            relative_path,
            size: entry.metadata()?.len(),
        });
    }

    Ok(files)
}

fn should_exclude(entry: &DirEntry, names: &[String]) -> bool {
    let file_name = entry.file_name().to_string_lossy();
    names.iter().any(|name| file_name == name.as_str())
}
