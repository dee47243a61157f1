// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Media library collaborators
//!
//! The rename applier never touches the disk or the database directly; it
//! works through the traits defined here so each piece can be swapped for a
//! fake in tests.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

use crate::sanitize::split_extension;
use crate::{RenamerError, Result};

/// A media item's record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub status: String,
    pub post_type: String,
    pub parent: i64,
    pub date: String,
    pub caption: String,
    /// Stored path, relative to the library base directory unless absolute
    pub attached_file: Option<String>,
}

/// Tables that may hold URLs pointing at a media file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceTable {
    /// Post bodies
    Content,
    /// Key/value metadata values
    Meta,
}

/// File storage operations
pub trait FileStore {
    fn exists(&self, path: &Path) -> bool;

    /// Move `src` to `dst`, replacing `dst` only when `overwrite` is set
    fn move_file(&self, src: &Path, dst: &Path, overwrite: bool) -> Result<()>;

    /// Return a filename that does not exist in `dir`.
    ///
    /// Collisions get `-1`, `-2`, ... inserted before the extension.
    fn unique_filename(&self, dir: &Path, candidate: &str) -> String {
        if !self.exists(&dir.join(candidate)) {
            return candidate.to_string();
        }

        let (stem, ext) = split_extension(candidate);
        let mut n: u32 = 1;
        loop {
            let name = match ext {
                Some(ext) => format!("{}-{}.{}", stem, n, ext),
                None => format!("{}-{}", stem, n),
            };
            if !self.exists(&dir.join(&name)) {
                return name;
            }
            n += 1;
        }
    }
}

/// Persisted attachment records
pub trait RecordStore {
    fn attachment(&self, id: i64) -> Result<Option<Attachment>>;

    /// Stored attached-file path, if any
    fn attached_file(&self, id: i64) -> Result<Option<String>>;

    fn update_attached_file(&self, id: i64, relative: &str) -> Result<()>;

    /// Make `slug` unique among posts sharing the status, type and parent
    fn unique_slug(&self, slug: &str, id: i64, status: &str, post_type: &str, parent: i64) -> Result<String>;

    fn update_title_and_slug(&self, id: i64, title: &str, slug: &str) -> Result<()>;

    fn attachment_metadata(&self, id: i64) -> Result<Option<serde_json::Value>>;

    fn update_attachment_metadata(&self, id: i64, metadata: &serde_json::Value) -> Result<()>;

    /// Substring-replace `old` with `new` in rows whose text contains `old`.
    /// Returns the number of rows rewritten.
    fn replace_references(&self, table: ReferenceTable, old: &str, new: &str) -> Result<usize>;
}

/// Derived-asset generation (resized variants plus descriptive metadata)
pub trait AssetGenerator {
    fn generate(&self, id: i64, path: &Path) -> Result<serde_json::Value>;
}

/// Append-only audit log of rename attempts
pub trait RenameLog {
    fn log_rename(&self, old: &str, new: &str);
    fn log_error(&self, message: &str);
}

/// Where the library lives on disk and on the web
#[derive(Debug, Clone)]
pub struct LibraryPaths {
    base_dir: PathBuf,
    base_url: String,
}

impl LibraryPaths {
    /// `base_dir` is made absolute so `./uploads` and `uploads` compare equal
    pub fn new(base_dir: PathBuf, base_url: &str) -> Self {
        Self {
            base_dir: absolute(&base_dir),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Turn a stored attached-file value into an absolute path
    pub fn resolve(&self, stored: &str) -> PathBuf {
        let path = Path::new(stored);
        if path.is_absolute() {
            normalize(path)
        } else {
            normalize(&self.base_dir.join(path))
        }
    }

    /// Path relative to the base directory, with `/` separators.
    ///
    /// Paths outside the base directory are returned whole.
    pub fn relative(&self, path: &Path) -> String {
        let path = absolute(path);
        let rel = path.strip_prefix(&self.base_dir).unwrap_or(&path);
        let joined = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        joined.trim_start_matches(['/', '\\']).to_string()
    }

    /// Form in which a path is persisted: relative inside the library, absolute outside it
    pub fn stored_form(&self, path: &Path) -> String {
        let path = absolute(path);
        if path.starts_with(&self.base_dir) {
            self.relative(&path)
        } else {
            path.to_string_lossy().into_owned()
        }
    }

    pub fn url_for(&self, relative: &str) -> String {
        format!("{}/{}", self.base_url, relative.trim_start_matches('/'))
    }
}

/// Absolute, lexically normalized form of `path`.
///
/// Relative paths are joined onto the working directory. Symlinks are not
/// resolved, so the path does not have to exist.
fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return normalize(path);
    }
    match std::env::current_dir() {
        Ok(cwd) => normalize(&cwd.join(path)),
        Err(e) => {
            warn!("Cannot read working directory ({}), keeping {:?} as is", e, path);
            normalize(path)
        }
    }
}

/// Drop `.` components and fold `..` into its parent
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(not(windows))]
const CROSS_DEVICE_ERROR: i32 = 18; // EXDEV
#[cfg(windows)]
const CROSS_DEVICE_ERROR: i32 = 17; // ERROR_NOT_SAME_DEVICE

fn is_cross_device(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(CROSS_DEVICE_ERROR)
}

/// Copy then delete the source; a copy is never left behind on failure
fn copy_across_devices(src: &Path, dst: &Path) -> Result<()> {
    let existed = dst.exists();
    if let Err(e) = std::fs::copy(src, dst) {
        if !existed {
            let _ = std::fs::remove_file(dst);
        }
        return Err(e.into());
    }

    if let Err(e) = std::fs::remove_file(src) {
        if let Err(cleanup) = std::fs::remove_file(dst) {
            warn!("Could not remove copy {:?} after failed move: {}", dst, cleanup);
        }
        return Err(RenamerError::MoveFailed(format!(
            "Could not remove {} after copying it: {}",
            src.display(),
            e
        )));
    }
    Ok(())
}

/// [`FileStore`] over the local file system
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileStore;

impl FileStore for LocalFileStore {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn move_file(&self, src: &Path, dst: &Path, overwrite: bool) -> Result<()> {
        if !overwrite && dst.exists() {
            return Err(RenamerError::MoveFailed(format!(
                "Destination already exists: {}",
                dst.display()
            )));
        }

        debug!("Moving {:?} -> {:?}", src, dst);
        match std::fs::rename(src, dst) {
            Ok(()) => Ok(()),
            Err(e) if is_cross_device(&e) => {
                debug!("{:?} is on another device, copying", dst);
                copy_across_devices(src, dst)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Extensions registered as media on import
pub fn is_media_file(path: &Path) -> bool {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return false,
    };

    // Skip hidden files
    if name.starts_with('.') {
        return false;
    }

    let ext = match path.extension().and_then(|e| e.to_str()) {
        Some(e) => e.to_ascii_lowercase(),
        None => return false,
    };

    matches!(
        ext.as_str(),
        "jpg" | "jpeg" | "png" | "gif" | "webp" | "bmp" | "tif" | "tiff" | "avif"
            | "pdf" | "mp3" | "wav" | "ogg" | "m4a" | "mp4" | "webm" | "mov"
            | "doc" | "docx" | "xls" | "xlsx" | "ppt" | "pptx" | "odt" | "txt" | "zip"
    )
}
