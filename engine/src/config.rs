//! Configuration model.
//!
//! `RawConfig` is the flat key-value mapping persisted (encrypted) on disk and
//! produced by the setup front-ends. `RawConfig::validate` turns it into the
//! immutable `SyncConfiguration` the orchestrator and scheduler run with.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::schedule::Schedule;

/// SSH port used when none is configured.
pub const DEFAULT_REMOTE_PORT: u16 = 22;

/// Settings exactly as stored: every field optional, nothing checked yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    pub local_sync: bool,

    #[serde(default)]
    pub sftp_sync: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_folder: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_backup_folder: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_backup_directory: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_password: Option<String>,

    /// `daily`, `weekly` or `custom`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_interval: Option<String>,

    /// `HH:MM` fire time for daily and weekly schedules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_time: Option<String>,

    /// Interval for the `custom` schedule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_interval_minutes: Option<i64>,

    /// Per-operation I/O timeout for the SFTP session; absent or 0 disables it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_timeout_secs: Option<u64>,
}

impl RawConfig {
    /// Check the settings and build the typed configuration.
    ///
    /// Every missing field of an enabled mode is reported in one error.
    ///
    /// # Errors
    /// `EngineError::Configuration` when no sync mode is enabled, a required
    /// field is missing, or the schedule is unusable.
    pub fn validate(&self) -> Result<SyncConfiguration, EngineError> {
        if !self.local_sync && !self.sftp_sync {
            return Err(EngineError::configuration(
                "neither local sync nor SFTP sync is enabled",
            ));
        }

        let mut missing = Vec::new();
        let source_folder = required(&self.source_folder, "source_folder", &mut missing);

        let local_folder = if self.local_sync {
            required(&self.local_backup_folder, "local_backup_folder", &mut missing)
        } else {
            None
        };

        let remote_fields = if self.sftp_sync {
            let directory = required(
                &self.remote_backup_directory,
                "remote_backup_directory",
                &mut missing,
            );
            let host = required(&self.remote_host, "remote_host", &mut missing);
            let username = required(&self.remote_username, "remote_username", &mut missing);
            let password = required(&self.remote_password, "remote_password", &mut missing);
            Some((directory, host, username, password))
        } else {
            None
        };

        if !missing.is_empty() {
            return Err(EngineError::configuration(format!(
                "missing required settings: {}",
                missing.join(", ")
            )));
        }

        let schedule = Schedule::parse(
            self.schedule_interval.as_deref(),
            self.schedule_time.as_deref(),
            self.custom_interval_minutes,
        )?;

        if self.remote_port == Some(0) {
            return Err(EngineError::configuration("remote_port must be between 1 and 65535"));
        }

        let local = local_folder.map(|folder| LocalTarget {
            backup_folder: PathBuf::from(folder),
        });

        let remote = match remote_fields {
            Some((Some(directory), Some(host), Some(username), Some(password))) => {
                Some(RemoteTarget {
                    host,
                    port: self.remote_port.unwrap_or(DEFAULT_REMOTE_PORT),
                    username,
                    password,
                    backup_directory: PathBuf::from(directory),
                    io_timeout: self
                        .remote_timeout_secs
                        .filter(|secs| *secs > 0)
                        .map(Duration::from_secs),
                })
            }
            _ => None,
        };

        Ok(SyncConfiguration {
            source_folder: PathBuf::from(source_folder.unwrap_or_default()),
            local,
            remote,
            schedule,
        })
    }

    /// Boolean form of `validate`.
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Copy with the password replaced, for display.
    pub fn redacted(&self) -> RawConfig {
        let mut copy = self.clone();
        if copy.remote_password.is_some() {
            copy.remote_password = Some("********".to_string());
        }
        copy
    }
}

fn required(value: &Option<String>, name: &'static str, missing: &mut Vec<&'static str>) -> Option<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Some(v.to_string()),
        _ => {
            missing.push(name);
            None
        }
    }
}

/// Validated, immutable settings for backup runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfiguration {
    /// Tree to mirror
    pub source_folder: PathBuf,

    /// Present when local sync is enabled
    pub local: Option<LocalTarget>,

    /// Present when SFTP sync is enabled
    pub remote: Option<RemoteTarget>,

    pub schedule: Schedule,
}

/// Local mirror destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTarget {
    pub backup_folder: PathBuf,
}

/// Remote mirror destination reached over SFTP.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,

    /// Root directory on the remote host (forward-slash path)
    pub backup_directory: PathBuf,

    /// Per-operation I/O timeout; `None` waits indefinitely
    pub io_timeout: Option<Duration>,
}

impl RemoteTarget {
    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"********")
            .field("backup_directory", &self.backup_directory)
            .field("io_timeout", &self.io_timeout)
            .finish()
    }
}
