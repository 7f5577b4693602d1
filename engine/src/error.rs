//! Error types for the sync engine.
//!
//! `EngineError` covers faults that end a run, a destination or the whole
//! startup sequence. Per-file copy failures are recorded as `FileError`
//! entries inside a `SyncRunResult`; they surface here only as the value a
//! backend hands back to the engine before it is turned into a record.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by backends, the engine, the orchestrator and the
/// configuration layer.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Remote host unreachable or authentication rejected
    #[error("Failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    /// Destination path has never been written (not a fault for the engine)
    #[error("Not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// Reading a file's metadata failed for a reason other than absence
    #[error("Failed to read metadata of {}: {source}", path.display())]
    Stat { path: PathBuf, source: io::Error },

    /// Copying a single file failed
    #[error("Failed to copy {} to {}: {source}", from.display(), to.display())]
    Transfer {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    /// A destination directory could not be created or entered
    #[error("Failed to create directory {}: {source}", path.display())]
    DirectoryCreation { path: PathBuf, source: io::Error },

    /// Source directory does not exist
    #[error("Source directory not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    /// Walking the source tree failed
    #[error("Failed to enumerate {}: {source}", path.display())]
    Enumeration { path: PathBuf, source: io::Error },

    /// Missing or inconsistent settings
    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },

    /// No saved configuration blob
    #[error("Configuration file not found: {}", path.display())]
    ConfigNotFound { path: PathBuf },

    /// Reading or writing the key or configuration file failed
    #[error("Configuration storage error at {}: {source}", path.display())]
    ConfigStore { path: PathBuf, source: io::Error },

    /// Key material rejected or blob could not be decrypted
    #[error("Encryption error: {reason}")]
    Encryption { reason: String },

    /// Neither destination produced a result
    #[error("Backup produced no result: no destination completed")]
    NothingSynced,
}

impl EngineError {
    /// True for the "absent" case the engine maps to the epoch timestamp.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_error_names_both_paths() {
        let err = EngineError::Transfer {
            from: PathBuf::from("src/a.txt"),
            to: PathBuf::from("dst/a.txt"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains("src/a.txt"));
        assert!(msg.contains("dst/a.txt"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn test_not_found_is_distinguished() {
        let err = EngineError::NotFound {
            path: PathBuf::from("x"),
        };
        assert!(err.is_not_found());
        assert!(!EngineError::NothingSynced.is_not_found());
    }
}
