//! Local filesystem backend.
//!
//! This module provides the local medium for the engine:
//! - Walking a directory tree lazily, depth-first
//! - Copying files with modification-time preservation
//! - Creating directories recursively
//!
//! The source side of every run is walked through `walk_tree`, whatever the
//! destination backend is.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::warn;
use walkdir::WalkDir;

use crate::backend::{staging_path, TransferBackend, TreeWalk};
use crate::error::EngineError;

/// Backend writing to a directory on a locally mounted filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalBackend;

impl TransferBackend for LocalBackend {
    fn label(&self) -> String {
        "local filesystem".to_string()
    }

    fn destination_path(&self, root: &Path, relative: &Path) -> PathBuf {
        root.join(relative)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn modification_time(&self, path: &Path) -> Result<SystemTime, EngineError> {
        file_modification_time(path)
    }

    fn ensure_directory(&self, path: &Path) -> Result<(), EngineError> {
        ensure_dir_exists(path)
    }

    fn copy_file(&self, src: &Path, dst: &Path) -> Result<u64, EngineError> {
        copy_file_with_metadata(src, dst)
    }

    fn list_tree<'a>(&'a self, root: &Path) -> Result<TreeWalk<'a>, EngineError> {
        walk_tree(root)
    }
}

/// Walk `root` depth-first and lazily yield file paths relative to it.
///
/// Entries inside a directory are visited in file-name order. Directories
/// themselves are not yielded. An entry that cannot be read (for example a
/// file removed while the walk is in progress) is yielded as an error so the
/// caller can record it and continue.
///
/// # Errors
/// Returns `EngineError::SourceNotFound` if `root` does not exist or is not a
/// directory.
pub fn walk_tree(root: &Path) -> Result<TreeWalk<'static>, EngineError> {
    match fs::metadata(root) {
        Ok(metadata) if metadata.is_dir() => {}
        Ok(_) => {
            return Err(EngineError::Enumeration {
                path: root.to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
            })
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(EngineError::SourceNotFound {
                path: root.to_path_buf(),
            })
        }
        Err(e) => {
            return Err(EngineError::Enumeration {
                path: root.to_path_buf(),
                source: e,
            })
        }
    }

    let root = root.to_path_buf();
    let walker = WalkDir::new(&root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter();

    let files = walker.filter_map(move |entry| match entry {
        Ok(entry) if entry.file_type().is_file() => {
            let relative = entry
                .path()
                .strip_prefix(&root)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| entry.path().to_path_buf());
            Some(Ok(relative))
        }
        Ok(_) => None,
        Err(e) => {
            let path = e
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| root.clone());
            Some(Err(EngineError::Enumeration {
                path,
                source: io::Error::from(e),
            }))
        }
    });

    Ok(Box::new(files))
}

/// Modification time of a local path.
///
/// # Errors
/// `EngineError::NotFound` if the path does not exist, `EngineError::Stat`
/// for any other metadata failure.
pub fn file_modification_time(path: &Path) -> Result<SystemTime, EngineError> {
    let metadata = fs::metadata(path).map_err(|e| stat_error(path, e))?;
    metadata.modified().map_err(|e| stat_error(path, e))
}

fn stat_error(path: &Path, e: io::Error) -> EngineError {
    if e.kind() == io::ErrorKind::NotFound {
        EngineError::NotFound {
            path: path.to_path_buf(),
        }
    } else {
        EngineError::Stat {
            path: path.to_path_buf(),
            source: e,
        }
    }
}

/// Copy a file from source to destination, preserving the modification time.
///
/// The data is written to a hidden sibling (see `staging_path`) and renamed
/// over `dst` only once it is complete, so a failed copy leaves any existing
/// destination untouched and the file is retried on the next run.
///
/// # Returns
/// Number of bytes copied
///
/// # Errors
/// Returns `EngineError::Transfer` if the copy fails, including when the
/// source vanished before it could be opened.
pub fn copy_file_with_metadata(src: &Path, dst: &Path) -> Result<u64, EngineError> {
    let transfer_error = |e: io::Error| EngineError::Transfer {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    };

    // Ensure parent directory exists
    ensure_parent_dir_exists(dst).map_err(|e| match e {
        EngineError::DirectoryCreation { source, .. } => transfer_error(source),
        other => other,
    })?;

    let mut src_file = fs::File::open(src).map_err(transfer_error)?;
    let src_mtime = src_file
        .metadata()
        .and_then(|m| m.modified())
        .map_err(transfer_error)?;

    let staged = staging_path(dst);
    let result = write_staged(&mut src_file, &staged)
        .and_then(|bytes| fs::rename(&staged, dst).map(|_| bytes));
    let bytes_copied = match result {
        Ok(bytes) => bytes,
        Err(e) => {
            if let Err(cleanup) = fs::remove_file(&staged) {
                if cleanup.kind() != io::ErrorKind::NotFound {
                    warn!(path = %staged.display(), error = %cleanup, "could not remove partial copy");
                }
            }
            return Err(transfer_error(e));
        }
    };

    // A destination newer than the source still satisfies newer-wins on the
    // next run, so a failure here only costs a redundant copy later.
    if let Err(e) = filetime::set_file_mtime(dst, filetime::FileTime::from_system_time(src_mtime))
    {
        warn!(path = %dst.display(), error = %e, "could not preserve modification time");
    }

    Ok(bytes_copied)
}

fn write_staged(src_file: &mut fs::File, staged: &Path) -> io::Result<u64> {
    let mut staged_file = fs::File::create(staged)?;
    let bytes = io::copy(src_file, &mut staged_file)?;
    staged_file.sync_all()?;
    Ok(bytes)
}

/// Ensure a directory exists, creating it and its ancestors if necessary.
///
/// # Errors
/// Returns `EngineError::DirectoryCreation` if creation fails or the path
/// exists but is not a directory.
pub fn ensure_dir_exists(path: &Path) -> Result<(), EngineError> {
    if path.as_os_str().is_empty() {
        return Ok(());
    }

    match fs::metadata(path) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(EngineError::DirectoryCreation {
            path: path.to_path_buf(),
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                "Path exists but is not a directory",
            ),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(path).map_err(|e| EngineError::DirectoryCreation {
                path: path.to_path_buf(),
                source: e,
            })
        }
        Err(e) => Err(EngineError::DirectoryCreation {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Ensure the parent directory of a path exists, creating it if necessary.
pub fn ensure_parent_dir_exists(path: &Path) -> Result<(), EngineError> {
    match path.parent() {
        Some(parent) => ensure_dir_exists(parent),
        None => Ok(()),
    }
}
