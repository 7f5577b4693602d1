//! Core data model for sync runs.
//!
//! - SyncRunResult: accounting for one engine run against one destination
//! - FileError: a single per-file failure inside a run
//! - Destination: which medium a result belongs to
//! - BackupReport: what the orchestrator returns for one backup pass

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::error::EngineError;

/// Timestamp used for a destination file that has never been written.
pub const NEVER_SYNCED: SystemTime = UNIX_EPOCH;

/// Result of one engine run (one source tree against one destination).
#[derive(Debug, Clone)]
pub struct SyncRunResult {
    /// Identifier used to correlate log lines of this run
    pub run_id: Uuid,

    /// Root source directory
    pub source_path: PathBuf,

    /// Root destination, as the backend addresses it
    pub destination_path: PathBuf,

    /// Files transferred because the source was newer
    pub files_copied: usize,

    /// Files already up to date
    pub files_skipped: usize,

    /// Files that could not be transferred
    pub files_failed: usize,

    /// Sum of bytes written for copied files
    pub bytes_copied: u64,

    /// Per-file failures, in walk order
    pub errors: Vec<FileError>,

    pub started_at: SystemTime,
    pub finished_at: Option<SystemTime>,
}

impl SyncRunResult {
    pub fn new(source_path: PathBuf, destination_path: PathBuf) -> Self {
        SyncRunResult {
            run_id: Uuid::new_v4(),
            source_path,
            destination_path,
            files_copied: 0,
            files_skipped: 0,
            files_failed: 0,
            bytes_copied: 0,
            errors: Vec::new(),
            started_at: SystemTime::now(),
            finished_at: None,
        }
    }

    /// Number of files the walk produced.
    pub fn total_files(&self) -> usize {
        self.files_copied + self.files_skipped + self.files_failed
    }

    /// True when no file failed.
    pub fn is_clean(&self) -> bool {
        self.files_failed == 0
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.finished_at
            .and_then(|end| end.duration_since(self.started_at).ok())
    }

    /// Human-readable counts line.
    pub fn summary(&self) -> String {
        format!(
            "{} files copied, {} skipped, {} failed",
            self.files_copied, self.files_skipped, self.files_failed
        )
    }

    pub(crate) fn record_failure(&mut self, relative_path: PathBuf, message: String) {
        self.files_failed += 1;
        self.errors.push(FileError {
            relative_path,
            message,
        });
    }
}

/// A file that failed during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileError {
    /// Path relative to the source root
    pub relative_path: PathBuf,

    /// Error detail including source path, destination path and cause
    pub message: String,
}

/// The destination a result is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Local,
    Remote,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Local => write!(f, "local"),
            Destination::Remote => write!(f, "remote"),
        }
    }
}

/// Outcome for one destination: a run result, or the fault that ended it.
pub type DestinationOutcome = Result<SyncRunResult, EngineError>;

/// Output of one backup pass over every enabled destination.
#[derive(Debug, Default)]
pub struct BackupReport {
    /// Present when local sync is enabled
    pub local: Option<DestinationOutcome>,

    /// Present when remote sync is enabled
    pub remote: Option<DestinationOutcome>,

    /// Orchestrator-level error (no destination produced a result)
    pub error: Option<EngineError>,
}

impl BackupReport {
    /// Iterate over the destinations that were attempted.
    pub fn outcomes(&self) -> impl Iterator<Item = (Destination, &DestinationOutcome)> {
        self.local
            .iter()
            .map(|o| (Destination::Local, o))
            .chain(self.remote.iter().map(|o| (Destination::Remote, o)))
    }

    /// Successful run results with their destination.
    pub fn results(&self) -> impl Iterator<Item = (Destination, &SyncRunResult)> {
        self.outcomes()
            .filter_map(|(dest, outcome)| outcome.as_ref().ok().map(|r| (dest, r)))
    }

    /// True when every attempted destination completed and no file failed.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
            && self
                .outcomes()
                .all(|(_, outcome)| matches!(outcome, Ok(result) if result.is_clean()))
    }
}

/// Whole seconds since the epoch; timestamps before it collapse to zero.
pub(crate) fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Newer-wins rule: copy only when the source is strictly newer.
///
/// Compared at whole-second resolution because SFTP reports whole seconds.
pub fn source_is_newer(source: SystemTime, destination: SystemTime) -> bool {
    unix_seconds(source) > unix_seconds(destination)
}
