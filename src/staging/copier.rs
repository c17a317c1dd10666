//! Filtered copy of the project tree into a staging directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::StageError;

/// Path fragments that are never copied into a staging directory.
pub const DEFAULT_EXCLUDES: &[&str] = &[".git", "node_modules"];

/// Decides which entries of the project tree are staged.
///
/// An entry is skipped when its path relative to the project root contains
/// any excluded fragment. Skipping a directory skips everything below it.
#[derive(Debug, Clone)]
pub struct CopyFilter {
    excluded: Vec<String>,
}

impl Default for CopyFilter {
    fn default() -> Self {
        Self {
            excluded: DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl CopyFilter {
    /// Creates a filter excluding exactly `excluded`.
    pub fn new(excluded: Vec<String>) -> Self {
        Self { excluded }
    }

    /// Adds another excluded fragment.
    pub fn with_excluded(mut self, fragment: impl Into<String>) -> Self {
        self.excluded.push(fragment.into());
        self
    }

    /// Returns true if `relative` should be copied.
    pub fn includes(&self, relative: &Path) -> bool {
        let relative = relative.to_string_lossy();
        !self
            .excluded
            .iter()
            .any(|fragment| relative.contains(fragment.as_str()))
    }
}

/// Copies `source` to `destination`, skipping entries rejected by `filter`.
///
/// `destination` is replaced if it already exists. Its parent must exist.
/// When the copy fails halfway the partial destination is removed before the
/// error is returned.
///
/// Returns the number of files copied.
pub async fn copy_project(
    source: &Path,
    destination: &Path,
    filter: &CopyFilter,
) -> Result<u64, StageError> {
    let source = source.to_path_buf();
    let destination = destination.to_path_buf();
    let filter = filter.clone();
    let target = destination.clone();

    tokio::task::spawn_blocking(move || copy_tree(&source, &destination, &filter))
        .await
        .map_err(|e| StageError::io(target, io::Error::other(e)))?
}

fn copy_tree(source: &Path, destination: &Path, filter: &CopyFilter) -> Result<u64, StageError> {
    let metadata = fs::metadata(source).map_err(|e| StageError::io(source, e))?;
    if !metadata.is_dir() {
        return Err(StageError::io(
            source,
            io::Error::new(io::ErrorKind::InvalidInput, "source is not a directory"),
        ));
    }

    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() && !parent.is_dir() {
            return Err(StageError::io(
                parent,
                io::Error::new(io::ErrorKind::NotFound, "parent directory does not exist"),
            ));
        }
    }

    if destination.exists() {
        fs::remove_dir_all(destination).map_err(|e| StageError::io(destination, e))?;
    }

    match copy_entries(source, destination, filter) {
        Ok(copied) => Ok(copied),
        Err(e) => {
            if let Err(cleanup) = fs::remove_dir_all(destination) {
                tracing::debug!(path = %destination.display(), error = %cleanup, "Failed to remove partial staging copy");
            }
            Err(e)
        }
    }
}

fn copy_entries(source: &Path, destination: &Path, filter: &CopyFilter) -> Result<u64, StageError> {
    fs::create_dir(destination).map_err(|e| StageError::io(destination, e))?;

    let walker = WalkDir::new(source)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
            filter.includes(relative)
        });

    let mut copied = 0;
    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| source.to_path_buf());
            StageError::io(path, e.into())
        })?;
        let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
        let target: PathBuf = destination.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| StageError::io(&target, e))?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| StageError::io(entry.path(), e))?;
            copied += 1;
        }
    }

    Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> Result<(), StageError> {
    let points_to = fs::read_link(link).map_err(|e| StageError::io(link, e))?;
    std::os::unix::fs::symlink(points_to, target).map_err(|e| StageError::io(target, e))
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> Result<(), StageError> {
    fs::copy(link, target)
        .map(|_| ())
        .map_err(|e| StageError::io(link, e))
}
