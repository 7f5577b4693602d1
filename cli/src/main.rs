//! mirrorsync - command-line front-end for the sync engine.
//!
//! Configures the agent interactively, runs the recurring scheduler until
//! interrupted, or performs a single backup pass on demand.

mod setup;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use console::style;
use engine::store::LOG_FILE_NAME;
use engine::{
    run_backup, schedule_backup, BackupReport, ConfigStore, EngineError, RawConfig, Scheduler,
    ShutdownToken, SyncObserver, SyncRunResult,
};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

/// mirrorsync - scheduled incremental mirroring
#[derive(Parser, Debug)]
#[command(name = "mirrorsync")]
#[command(version)]
#[command(about = "Keep local and SFTP mirrors of a folder up to date on a schedule")]
struct Args {
    /// Directory holding the encrypted configuration, key and log
    #[arg(long, value_name = "PATH", global = true)]
    config_dir: Option<PathBuf>,

    /// Print every file decision and enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Create or edit the configuration interactively
    Setup,
    /// Run backups on the configured schedule until interrupted
    Run,
    /// Run one backup pass now
    Once,
    /// Print the stored configuration with the password masked
    Show,
}

/// Prints per-file decisions when `--verbose` is given.
struct CliObserver {
    verbose: bool,
}

impl CliObserver {
    fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_idx = 0;

        while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
            size /= 1024.0;
            unit_idx += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

impl SyncObserver for CliObserver {
    fn on_run_started(&self, source: &Path, destination: &Path) {
        eprintln!("Syncing {} -> {}", source.display(), destination.display());
    }

    fn on_file_copied(&self, relative: &Path, bytes: u64) {
        if self.verbose {
            eprintln!(
                "  {} {} ({})",
                style("copied ").green(),
                relative.display(),
                Self::format_bytes(bytes)
            );
        }
    }

    fn on_file_skipped(&self, relative: &Path) {
        if self.verbose {
            eprintln!("  {} {}", style("skipped").dim(), relative.display());
        }
    }

    fn on_file_failed(&self, relative: &Path, error: &EngineError) {
        eprintln!("  {} {}: {}", style("failed ").red(), relative.display(), error);
    }

    fn on_run_completed(&self, result: &SyncRunResult) {
        let elapsed = result.elapsed().map(|d| d.as_secs_f64()).unwrap_or_default();
        eprintln!(
            "  {} ({} copied in {:.1}s)",
            result.summary(),
            Self::format_bytes(result.bytes_copied),
            elapsed
        );
    }
}

fn main() {
    let args = Args::parse();

    let exit_code = match run_cli(&args) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{} {:#}", style("Error:").red(), e);
            2
        }
    };

    std::process::exit(exit_code);
}

/// Main CLI logic - separated for testability
fn run_cli(args: &Args) -> Result<()> {
    let store = match &args.config_dir {
        Some(dir) => ConfigStore::in_dir(dir),
        None => ConfigStore::default_location()?,
    };
    let _log_guard = init_logging(store.dir(), args.verbose)?;

    match args.command {
        Command::Setup => setup_command(&store),
        Command::Run => {
            let shutdown = ShutdownToken::new();
            install_signal_handlers(&shutdown)?;
            run_command(&store, &shutdown, args.verbose).map(|_| ())
        }
        Command::Once => once_command(&store, args.verbose),
        Command::Show => show_command(&store),
    }
}

/// Log to stderr and append to `backup.log` in the configuration directory.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the lifetime of the process.
fn init_logging(log_dir: &Path, verbose: bool) -> Result<WorkerGuard> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create {}", log_dir.display()))?;

    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Invalid log filter")?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, LOG_FILE_NAME));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .try_init()
        .context("Failed to install the log subscriber")?;

    Ok(guard)
}

fn install_signal_handlers(shutdown: &ShutdownToken) -> Result<()> {
    use signal_hook::consts::signal::{SIGINT, SIGTERM};

    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, shutdown.flag())
            .with_context(|| format!("Failed to register handler for signal {}", signal))?;
    }
    Ok(())
}

fn load_raw(store: &ConfigStore) -> Result<RawConfig> {
    store.load().map_err(|e| match e {
        EngineError::ConfigNotFound { .. } => {
            anyhow::anyhow!("{} (run `mirrorsync setup` first)", e)
        }
        other => other.into(),
    })
}

fn setup_command(store: &ConfigStore) -> Result<()> {
    let current = match store.load() {
        Ok(config) => config,
        Err(EngineError::ConfigNotFound { .. }) => RawConfig::default(),
        Err(e) => return Err(e).context("Existing configuration could not be read"),
    };

    let config = setup::prompt_config(&current)?;
    store.save(&config)?;
    println!(
        "{} {}",
        style("Configuration saved to").green(),
        store.config_path().display()
    );
    Ok(())
}

/// Register the schedule and poll until `shutdown` is requested.
///
/// Returns the number of backup passes performed. A configuration or
/// schedule error is returned before the loop starts.
fn run_command(store: &ConfigStore, shutdown: &ShutdownToken, verbose: bool) -> Result<u64> {
    let raw = load_raw(store)?;
    let config = raw.validate()?;
    let job = schedule_backup(&raw, Local::now())?;

    println!(
        "{} next backup at {}",
        style(format!("Schedule: {}.", job.schedule())).cyan(),
        job.next_fire().format("%Y-%m-%d %H:%M:%S")
    );
    println!("Scheduler is running in the background. Press Ctrl+C to exit.");

    let observer = CliObserver { verbose };
    let mut scheduler = Scheduler::new(job, shutdown.clone());
    let runs = scheduler.run(|| {
        let report = run_backup(&config, Some(&observer));
        print_report(&report);
    });

    println!("Scheduler is shutting down.");
    info!(runs, "scheduler stopped");
    Ok(runs)
}

fn once_command(store: &ConfigStore, verbose: bool) -> Result<()> {
    let config = load_raw(store)?.validate()?;
    let observer = CliObserver { verbose };

    let report = run_backup(&config, Some(&observer));
    print_report(&report);

    if let Some(error) = report.error {
        bail!(error);
    }
    if !report.is_success() {
        bail!("One or more destinations or files failed");
    }
    Ok(())
}

fn show_command(store: &ConfigStore) -> Result<()> {
    let raw = load_raw(store)?;
    let json = serde_json::to_string_pretty(&raw.redacted())?;
    println!("{}", json);
    println!("{}", style(format!("Stored in {}", store.config_path().display())).dim());

    if let Err(e) = raw.validate() {
        println!("{} {}", style("Warning:").yellow(), e);
    }
    Ok(())
}

fn print_report(report: &BackupReport) {
    for (destination, outcome) in report.outcomes() {
        match outcome {
            Ok(result) if result.is_clean() => {
                println!("{} {}: {}", style("✓").green(), destination, result.summary())
            }
            Ok(result) => {
                println!("{} {}: {}", style("!").yellow(), destination, result.summary());
                for failure in &result.errors {
                    println!("    {}: {}", failure.relative_path.display(), failure.message);
                }
            }
            Err(e) => println!("{} {}: {}", style("✗").red(), destination, e),
        }
    }
    if let Some(error) = &report.error {
        println!("{} {}", style("✗").red(), error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn local_config(src: &Path, dst: &Path) -> RawConfig {
        RawConfig {
            local_sync: true,
            source_folder: Some(src.to_string_lossy().into_owned()),
            local_backup_folder: Some(dst.to_string_lossy().into_owned()),
            schedule_interval: Some("custom".to_string()),
            custom_interval_minutes: Some(30),
            ..RawConfig::default()
        }
    }

    fn saved_store(config: &RawConfig) -> (TempDir, ConfigStore) {
        let conf_dir = TempDir::new().expect("Failed to create temp dir");
        let store = ConfigStore::in_dir(conf_dir.path());
        store.save(config).expect("Failed to save configuration");
        (conf_dir, store)
    }

    #[test]
    fn test_args_parse_global_flags_after_subcommand() {
        let args = Args::try_parse_from(["mirrorsync", "once", "--verbose", "--config-dir", "/tmp/ms"])
            .expect("arguments should parse");
        assert_eq!(args.command, Command::Once);
        assert!(args.verbose);
        assert_eq!(args.config_dir, Some(PathBuf::from("/tmp/ms")));
    }

    #[test]
    fn test_args_require_subcommand() {
        assert!(Args::try_parse_from(["mirrorsync"]).is_err());
        assert!(Args::try_parse_from(["mirrorsync", "restore"]).is_err());
    }

    #[test]
    fn test_once_copies_files() {
        let src_dir = TempDir::new().expect("Failed to create temp dir");
        let dst_dir = TempDir::new().expect("Failed to create temp dir");
        fs::write(src_dir.path().join("test.txt"), "hello").expect("Failed to write file");

        let (_conf, store) = saved_store(&local_config(src_dir.path(), dst_dir.path()));
        once_command(&store, false).expect("backup should succeed");

        assert_eq!(
            fs::read_to_string(dst_dir.path().join("test.txt")).expect("copied file"),
            "hello"
        );
    }

    #[test]
    fn test_once_fails_without_configuration() {
        let conf_dir = TempDir::new().expect("Failed to create temp dir");
        let store = ConfigStore::in_dir(conf_dir.path());

        let err = once_command(&store, false).expect_err("no configuration saved");
        assert!(err.to_string().contains("mirrorsync setup"));
    }

    #[test]
    fn test_once_reports_missing_source() {
        let dst_dir = TempDir::new().expect("Failed to create temp dir");
        let missing = dst_dir.path().join("does-not-exist");

        let (_conf, store) = saved_store(&local_config(&missing, &dst_dir.path().join("out")));
        assert!(once_command(&store, false).is_err());
    }

    #[test]
    fn test_run_rejects_bad_schedule_before_looping() {
        let src_dir = TempDir::new().expect("Failed to create temp dir");
        let mut config = local_config(src_dir.path(), src_dir.path());
        config.custom_interval_minutes = Some(0);
        let (_conf, store) = saved_store(&config);

        let shutdown = ShutdownToken::new();
        assert!(run_command(&store, &shutdown, false).is_err());
    }

    #[test]
    fn test_run_stops_when_shutdown_already_requested() {
        let src_dir = TempDir::new().expect("Failed to create temp dir");
        let dst_dir = TempDir::new().expect("Failed to create temp dir");
        let (_conf, store) = saved_store(&local_config(src_dir.path(), dst_dir.path()));

        let shutdown = ShutdownToken::new();
        shutdown.request();
        let runs = run_command(&store, &shutdown, false).expect("clean shutdown");
        assert_eq!(runs, 0);
    }

    #[test]
    fn test_show_reads_saved_configuration() {
        let src_dir = TempDir::new().expect("Failed to create temp dir");
        let (_conf, store) = saved_store(&local_config(src_dir.path(), src_dir.path()));
        assert!(show_command(&store).is_ok());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(CliObserver::format_bytes(512), "512.00 B");
        assert_eq!(CliObserver::format_bytes(2048), "2.00 KB");
    }
}
