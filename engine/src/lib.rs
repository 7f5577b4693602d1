//! # mirrorsync engine - scheduled incremental mirroring
//!
//! A headless library that keeps one-way mirrors of a source directory tree
//! on a local destination, a remote SFTP destination, or both. It is the
//! shared core of the `mirrorsync` CLI and the `mirrorsync-setup` GUI.
//!
//! ## Overview
//!
//! - Transfer backends for the local filesystem and SFTP behind one trait
//! - Newer-wins diff-and-copy: a file is transferred only when the source is
//!   strictly newer than the destination copy
//! - Per-file error isolation: one failing file never stops a run
//! - Daily, weekly and every-N-minutes schedules with cooperative shutdown
//! - Encrypted configuration persistence
//!
//! ## Basic Usage
//!
//! ```no_run
//! use engine::{run_backup, ConfigStore};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = ConfigStore::default_location()?;
//! let config = store.load_configuration()?;
//!
//! let report = run_backup(&config, None);
//! for (destination, result) in report.results() {
//!     println!("{}: {}", destination, result.summary());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: run results and backup reports
//! - **error**: error types
//! - **config**: raw and validated settings
//! - **store**: encrypted configuration files
//! - **backend**: the transfer backend trait
//! - **fs_ops**: local filesystem backend
//! - **sftp**: SFTP backend
//! - **sync**: the diff-and-copy engine
//! - **backup**: runs the engine for every enabled destination
//! - **schedule**: schedules, the poll loop and shutdown
//! - **progress**: observer trait for front-ends

pub mod model;
pub mod error;
pub mod config;
pub mod store;
pub mod backend;
pub mod fs_ops;
pub mod sftp;
pub mod sync;
pub mod backup;
pub mod schedule;
pub mod progress;

// Re-export main types and functions
pub use model::{BackupReport, Destination, DestinationOutcome, FileError, SyncRunResult};
pub use error::EngineError;
pub use config::{LocalTarget, RawConfig, RemoteTarget, SyncConfiguration, DEFAULT_REMOTE_PORT};
pub use store::ConfigStore;
pub use backend::{Connect, TransferBackend};
pub use fs_ops::LocalBackend;
pub use sftp::{RemoteBackend, SftpConnector};
pub use sync::sync_tree;
pub use backup::{run_backup, run_backup_with};
pub use schedule::{
    schedule_backup, Schedule, ScheduleKind, ScheduledJob, Scheduler, SchedulerState, ShutdownToken,
};
pub use progress::SyncObserver;
