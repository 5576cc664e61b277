//! Atomic file writes.
//!
//! Content goes to a `<path>.upkeep.tmp` sibling first and is renamed over
//! the final path. The sibling lives in the same directory, so the rename
//! never crosses filesystems.

use std::io;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use crate::error::{io_err, CoreError};

/// Sibling temp path used by [`atomic_write`].
pub fn tmp_path_for(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.upkeep.tmp", path.display()))
}

/// Write `bytes` to `path` atomically, creating parent directories.
///
/// On rename failure the temp file is removed and the original (if any) is
/// left intact.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path_for(path);
    std::fs::write(&tmp, bytes)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), CoreError> {
    let json = serde_json::to_string_pretty(value)?;
    atomic_write(path, json.as_bytes()).map_err(|e| io_err(path, e))
}

/// Resolve a `/`-separated manifest path under `root`.
///
/// Returns `None` unless every component is a plain name, so the result can
/// never land outside `root`.
pub fn join_relative(root: &Path, relative: &str) -> Option<PathBuf> {
    let rel = Path::new(relative);
    let mut out = root.to_path_buf();
    let mut any = false;
    for component in rel.components() {
        match component {
            Component::Normal(part) => {
                out.push(part);
                any = true;
            }
            Component::CurDir => {}
            _ => return None,
        }
    }
    any.then_some(out)
}

/// `/`-joined plain components of `path`, dropping roots, prefixes, and `..`.
pub fn normal_components(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Absolute form of `path` with `.` and `..` folded away lexically.
///
/// Relative paths are resolved against the current directory. Symlinks are
/// not followed, so the path need not exist.
pub fn absolute_lexical(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}
