use engine::{ConfigStore, EngineError, RawConfig, ScheduleKind, DEFAULT_REMOTE_PORT};

/// Form state, holding every field as typed by the user.
#[derive(Debug, Clone)]
pub struct AppState {
    // Sync modes
    pub local_sync: bool,
    pub sftp_sync: bool,

    // Folders
    pub source_folder: String,
    pub local_backup_folder: String,

    // Remote connection
    pub remote_backup_directory: String,
    pub remote_host: String,
    pub remote_port: String,
    pub remote_username: String,
    pub remote_password: String,

    // Schedule
    pub schedule_kind: ScheduleKind,
    pub schedule_time: String,
    pub custom_interval_minutes: String,

    // UI state
    pub error_message: Option<String>,
    pub status_message: Option<String>,
}

impl AppState {
    pub fn new() -> Self {
        AppState {
            local_sync: false,
            sftp_sync: false,
            source_folder: String::new(),
            local_backup_folder: String::new(),
            remote_backup_directory: String::new(),
            remote_host: String::new(),
            remote_port: DEFAULT_REMOTE_PORT.to_string(),
            remote_username: String::new(),
            remote_password: String::new(),
            schedule_kind: ScheduleKind::Daily,
            schedule_time: String::new(),
            custom_interval_minutes: String::new(),
            error_message: None,
            status_message: None,
        }
    }

    /// Pre-fill the form from a stored configuration.
    pub fn from_raw(raw: &RawConfig) -> Self {
        let text = |value: &Option<String>| value.clone().unwrap_or_default();
        AppState {
            local_sync: raw.local_sync,
            sftp_sync: raw.sftp_sync,
            source_folder: text(&raw.source_folder),
            local_backup_folder: text(&raw.local_backup_folder),
            remote_backup_directory: text(&raw.remote_backup_directory),
            remote_host: text(&raw.remote_host),
            remote_port: raw
                .remote_port
                .unwrap_or(DEFAULT_REMOTE_PORT)
                .to_string(),
            remote_username: text(&raw.remote_username),
            remote_password: text(&raw.remote_password),
            schedule_kind: raw
                .schedule_interval
                .as_deref()
                .and_then(|s| s.parse().ok())
                .unwrap_or(ScheduleKind::Daily),
            schedule_time: text(&raw.schedule_time),
            custom_interval_minutes: raw
                .custom_interval_minutes
                .map(|m| m.to_string())
                .unwrap_or_default(),
            ..AppState::new()
        }
    }

    /// Convert the form into the stored key-value shape.
    ///
    /// Only fields that cannot be represented at all (non-numeric port or
    /// interval) are rejected here; everything else is left to
    /// `RawConfig::validate`.
    pub fn to_raw_config(&self) -> Result<RawConfig, String> {
        let optional = |value: &str| {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        };

        let remote_port = match self.remote_port.trim() {
            "" => None,
            port => Some(
                port.parse::<u16>()
                    .map_err(|_| format!("Remote port '{}' is not a valid port number", port))?,
            ),
        };

        let (schedule_time, custom_interval_minutes) = match self.schedule_kind {
            ScheduleKind::Daily | ScheduleKind::Weekly => (optional(&self.schedule_time), None),
            ScheduleKind::Custom => {
                let minutes = match self.custom_interval_minutes.trim() {
                    "" => None,
                    minutes => Some(minutes.parse::<i64>().map_err(|_| {
                        format!("Interval '{}' is not a whole number of minutes", minutes)
                    })?),
                };
                (None, minutes)
            }
        };

        Ok(RawConfig {
            local_sync: self.local_sync,
            sftp_sync: self.sftp_sync,
            source_folder: optional(&self.source_folder),
            local_backup_folder: optional(&self.local_backup_folder),
            remote_backup_directory: optional(&self.remote_backup_directory),
            remote_host: optional(&self.remote_host),
            remote_port,
            remote_username: optional(&self.remote_username),
            // Passwords are kept verbatim, surrounding spaces included.
            remote_password: if self.remote_password.is_empty() {
                None
            } else {
                Some(self.remote_password.clone())
            },
            schedule_interval: Some(self.schedule_kind.as_str().to_string()),
            schedule_time,
            custom_interval_minutes,
            remote_timeout_secs: None,
        })
    }

    /// Validate the form and write it to `store`, updating the status lines.
    pub fn save(&mut self, store: &ConfigStore) {
        self.status_message = None;
        match self.try_save(store) {
            Ok(()) => {
                self.error_message = None;
                self.status_message = Some(format!(
                    "Configuration saved to {}",
                    store.config_path().display()
                ));
            }
            Err(message) => self.error_message = Some(message),
        }
    }

    fn try_save(&self, store: &ConfigStore) -> Result<(), String> {
        let raw = self.to_raw_config()?;
        raw.validate().map_err(|e| e.to_string())?;
        store.save(&raw).map_err(|e: EngineError| e.to_string())
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled() -> AppState {
        AppState {
            local_sync: true,
            source_folder: " /home/user/documents ".to_string(),
            local_backup_folder: "/mnt/backup".to_string(),
            schedule_time: "19:00".to_string(),
            ..AppState::new()
        }
    }

    #[test]
    fn test_to_raw_config_trims_and_drops_empty_fields() {
        let raw = filled().to_raw_config().expect("form is representable");
        assert_eq!(raw.source_folder.as_deref(), Some("/home/user/documents"));
        assert!(raw.remote_host.is_none());
        assert_eq!(raw.remote_port, Some(22));
        assert_eq!(raw.schedule_interval.as_deref(), Some("daily"));
        assert!(raw.is_valid());
    }

    #[test]
    fn test_custom_schedule_uses_minutes_only() {
        let state = AppState {
            schedule_kind: ScheduleKind::Custom,
            custom_interval_minutes: "15".to_string(),
            ..filled()
        };
        let raw = state.to_raw_config().expect("form is representable");
        assert_eq!(raw.custom_interval_minutes, Some(15));
        assert!(raw.schedule_time.is_none());
    }

    #[test]
    fn test_non_numeric_port_is_rejected() {
        let state = AppState {
            remote_port: "ssh".to_string(),
            ..filled()
        };
        assert!(state.to_raw_config().is_err());
    }

    #[test]
    fn test_round_trip_through_raw() {
        let raw = filled().to_raw_config().expect("form is representable");
        let reloaded = AppState::from_raw(&raw);
        assert_eq!(reloaded.source_folder, "/home/user/documents");
        assert_eq!(reloaded.schedule_kind, ScheduleKind::Daily);
        assert_eq!(reloaded.to_raw_config().expect("representable"), raw);
    }

    #[test]
    fn test_save_rejects_invalid_form() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = ConfigStore::in_dir(temp_dir.path());
        let mut state = AppState {
            sftp_sync: true,
            ..filled()
        };

        state.save(&store);

        let error = state.error_message.expect("validation error shown");
        assert!(error.contains("remote_host"));
        assert!(!store.exists());
    }

    #[test]
    fn test_save_writes_encrypted_config() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = ConfigStore::in_dir(temp_dir.path());
        let mut state = filled();

        state.save(&store);

        assert!(state.error_message.is_none());
        assert!(state.status_message.is_some());
        assert_eq!(
            store.load().expect("saved"),
            filled().to_raw_config().expect("representable")
        );
    }
}
