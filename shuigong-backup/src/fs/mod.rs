//! File system helpers.

pub mod walker;

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

/// Replace `target` with `content` via a sibling temp file and rename, so a
/// failed write never leaves a half-written file at `target`.
pub fn write_atomic(target: &Path, content: &mut dyn Read) -> io::Result<u64> {
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    let written = io::copy(content, &mut temp)?;
    temp.flush()?;
    temp.as_file().sync_all()?;
    temp.persist(target).map_err(|e| e.error)?;

    Ok(written)
}
