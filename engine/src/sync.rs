//! Incremental diff-and-copy engine.
//!
//! One call to `sync_tree` is one engine run: the source tree is walked
//! depth-first, each file's modification time is compared with the
//! destination copy, and newer files are transferred through the backend.
//! A failing file is recorded and the walk moves on; only a destination root
//! that cannot be created (or a missing source) ends the run early.

use std::path::Path;
use std::time::SystemTime;

use tracing::{debug, error, info, info_span, warn};

use crate::backend::TransferBackend;
use crate::error::EngineError;
use crate::fs_ops::{self, LocalBackend};
use crate::model::{source_is_newer, SyncRunResult, NEVER_SYNCED};
use crate::progress::SyncObserver;

/// What happened to one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Copied { bytes: u64 },
    Skipped,
}

/// Mirror `source` into `destination` on `backend`.
///
/// # Errors
/// `EngineError::SourceNotFound` / `Enumeration` if the source root cannot be
/// walked, `EngineError::DirectoryCreation` if the destination root cannot be
/// created. Per-file faults never produce an `Err`; they are counted in the
/// returned result.
pub fn sync_tree<B: TransferBackend + ?Sized>(
    source: &Path,
    destination: &Path,
    backend: &B,
    observer: Option<&dyn SyncObserver>,
) -> Result<SyncRunResult, EngineError> {
    let mut result = SyncRunResult::new(source.to_path_buf(), destination.to_path_buf());
    let span = info_span!("sync", run_id = %result.run_id, backend = %backend.label());
    let _guard = span.enter();

    let local = LocalBackend;
    let walk = local.list_tree(source).map_err(|e| {
        error!(source = %source.display(), error = %e, "cannot walk source");
        e
    })?;

    if let Err(e) = backend.ensure_directory(destination) {
        error!(destination = %destination.display(), error = %e, "cannot create destination root; no files attempted");
        return Err(e);
    }

    info!(
        source = %source.display(),
        destination = %destination.display(),
        "sync started"
    );
    if let Some(observer) = observer {
        observer.on_run_started(source, destination);
    }

    for entry in walk {
        let relative = match entry {
            Ok(relative) => relative,
            Err(e) => {
                let relative = match &e {
                    EngineError::Enumeration { path, .. } => path
                        .strip_prefix(source)
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|_| path.clone()),
                    _ => source.to_path_buf(),
                };
                warn!(path = %relative.display(), error = %e, "source entry unreadable");
                if let Some(observer) = observer {
                    observer.on_file_failed(&relative, &e);
                }
                result.record_failure(relative, e.to_string());
                continue;
            }
        };

        let src_path = source.join(&relative);
        let dst_path = backend.destination_path(destination, &relative);

        match sync_file(backend, &src_path, &dst_path) {
            Ok(FileOutcome::Copied { bytes }) => {
                info!(
                    source = %src_path.display(),
                    destination = %dst_path.display(),
                    bytes,
                    "copied"
                );
                result.files_copied += 1;
                result.bytes_copied += bytes;
                if let Some(observer) = observer {
                    observer.on_file_copied(&relative, bytes);
                }
            }
            Ok(FileOutcome::Skipped) => {
                debug!(path = %relative.display(), "up to date, skipped");
                result.files_skipped += 1;
                if let Some(observer) = observer {
                    observer.on_file_skipped(&relative);
                }
            }
            Err(e) => {
                warn!(
                    source = %src_path.display(),
                    destination = %dst_path.display(),
                    error = %e,
                    "copy failed"
                );
                if let Some(observer) = observer {
                    observer.on_file_failed(&relative, &e);
                }
                result.record_failure(relative, e.to_string());
            }
        }
    }

    result.finished_at = Some(SystemTime::now());
    info!(
        copied = result.files_copied,
        skipped = result.files_skipped,
        failed = result.files_failed,
        "{}",
        result.summary()
    );
    if let Some(observer) = observer {
        observer.on_run_completed(&result);
    }

    Ok(result)
}

/// Decide and, if needed, perform the transfer of one file.
///
/// A source that disappeared since it was listed surfaces as an error here,
/// which the caller records as a per-file failure.
pub fn sync_file<B: TransferBackend + ?Sized>(
    backend: &B,
    src_path: &Path,
    dst_path: &Path,
) -> Result<FileOutcome, EngineError> {
    let source_mtime = fs_ops::file_modification_time(src_path)?;
    let dest_mtime = match backend.modification_time(dst_path) {
        Ok(mtime) => mtime,
        Err(e) if e.is_not_found() => NEVER_SYNCED,
        Err(e) => return Err(e),
    };

    if !source_is_newer(source_mtime, dest_mtime) {
        return Ok(FileOutcome::Skipped);
    }

    if let Some(parent) = dst_path.parent() {
        backend.ensure_directory(parent)?;
    }
    let bytes = backend.copy_file(src_path, dst_path)?;
    Ok(FileOutcome::Copied { bytes })
}
