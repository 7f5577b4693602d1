//! Backup orchestration.
//!
//! One backup pass runs the engine once per enabled destination, local first
//! and then remote. The destinations are independent: a fault in one is
//! recorded in the report and the other still runs.

use tracing::{error, info, info_span, warn};

use crate::backend::Connect;
use crate::config::SyncConfiguration;
use crate::error::EngineError;
use crate::fs_ops::LocalBackend;
use crate::model::{BackupReport, Destination, DestinationOutcome};
use crate::progress::SyncObserver;
use crate::sftp::SftpConnector;
use crate::sync::sync_tree;

/// Run a backup pass with the SFTP connector.
pub fn run_backup(config: &SyncConfiguration, observer: Option<&dyn SyncObserver>) -> BackupReport {
    run_backup_with(config, &SftpConnector, observer)
}

/// Run a backup pass, opening remote sessions through `connector`.
///
/// `report.error` is set to `EngineError::NothingSynced` when no destination
/// produced a result, including when neither is enabled.
pub fn run_backup_with<C: Connect>(
    config: &SyncConfiguration,
    connector: &C,
    observer: Option<&dyn SyncObserver>,
) -> BackupReport {
    let span = info_span!("backup", source = %config.source_folder.display());
    let _guard = span.enter();
    info!("backup started");

    let mut report = BackupReport::default();

    if let Some(local) = &config.local {
        let outcome = sync_tree(
            &config.source_folder,
            &local.backup_folder,
            &LocalBackend,
            observer,
        );
        log_outcome(Destination::Local, &outcome);
        report.local = Some(outcome);
    }

    if let Some(remote) = &config.remote {
        // The session lives only for this block and is closed on drop.
        let outcome = connector.connect(remote).and_then(|backend| {
            info!(address = %remote.address(), "connected to remote host");
            sync_tree(
                &config.source_folder,
                &remote.backup_directory,
                &backend,
                observer,
            )
        });
        log_outcome(Destination::Remote, &outcome);
        report.remote = Some(outcome);
    }

    if report.results().next().is_none() {
        error!("no destination produced a result");
        report.error = Some(EngineError::NothingSynced);
    } else {
        info!(success = report.is_success(), "backup finished");
    }

    report
}

fn log_outcome(destination: Destination, outcome: &DestinationOutcome) {
    match outcome {
        Ok(result) if result.is_clean() => {
            info!(%destination, "{} sync complete: {}", destination, result.summary())
        }
        Ok(result) => warn!(
            %destination,
            "{} sync finished with failures: {}",
            destination,
            result.summary()
        ),
        Err(e) => error!(%destination, error = %e, "{} sync failed", destination),
    }
}
