//! Run observer trait.
//!
//! This module defines the SyncObserver trait, which decouples the engine
//! from whatever front-end reports progress (CLI output, GUI status line).
//! Log lines are emitted by the engine itself through `tracing`; observers
//! are for user-facing display.

use std::path::Path;

use crate::error::EngineError;
use crate::model::SyncRunResult;

/// Receives events while an engine run walks the source tree.
///
/// All methods are called synchronously on the engine's thread, in walk
/// order. Every method has an empty default so implementors pick only what
/// they display.
pub trait SyncObserver {
    /// Called once the destination root exists and the walk is about to start.
    fn on_run_started(&self, _source: &Path, _destination: &Path) {}

    /// Called after a file was transferred.
    fn on_file_copied(&self, _relative: &Path, _bytes: u64) {}

    /// Called for a file whose destination is already up to date.
    fn on_file_skipped(&self, _relative: &Path) {}

    /// Called when a file could not be transferred; the walk continues.
    fn on_file_failed(&self, _relative: &Path, _error: &EngineError) {}

    /// Called when the walk is complete.
    fn on_run_completed(&self, _result: &SyncRunResult) {}
}
