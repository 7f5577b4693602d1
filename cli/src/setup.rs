//! Interactive configuration prompts.

use anyhow::Result;
use console::style;
use dialoguer::{theme::ColorfulTheme, Confirm, Input, Password, Select};
use engine::schedule::parse_time_of_day;
use engine::{RawConfig, ScheduleKind, DEFAULT_REMOTE_PORT};

/// Ask for every setting, offering `current` values as defaults.
///
/// Prompts follow the order of the setup form: sync modes, folders, remote
/// connection, then the schedule. Loops until the answers validate or the
/// operator gives up.
pub fn prompt_config(current: &RawConfig) -> Result<RawConfig> {
    let theme = ColorfulTheme::default();
    let mut config = current.clone();

    println!(
        "{}",
        style(format!("mirrorsync setup v{}", env!("CARGO_PKG_VERSION")))
            .cyan()
            .bold()
    );
    println!("{}", style("----------------------------------------").dim());

    loop {
        config.local_sync = Confirm::with_theme(&theme)
            .with_prompt("Enable local sync?")
            .default(config.local_sync)
            .interact()?;
        config.sftp_sync = Confirm::with_theme(&theme)
            .with_prompt("Enable SFTP sync?")
            .default(config.sftp_sync)
            .interact()?;

        config.source_folder = Some(text(&theme, "Source folder", &config.source_folder)?);

        if config.local_sync {
            config.local_backup_folder = Some(text(
                &theme,
                "Local backup folder",
                &config.local_backup_folder,
            )?);
        }

        if config.sftp_sync {
            config.remote_backup_directory = Some(text(
                &theme,
                "Remote backup directory",
                &config.remote_backup_directory,
            )?);
            config.remote_host = Some(text(&theme, "Remote host", &config.remote_host)?);
            config.remote_port = Some(
                Input::<u16>::with_theme(&theme)
                    .with_prompt("Remote port")
                    .default(config.remote_port.unwrap_or(DEFAULT_REMOTE_PORT))
                    .validate_with(|port: &u16| -> Result<(), &'static str> {
                        if *port == 0 {
                            Err("port must be between 1 and 65535")
                        } else {
                            Ok(())
                        }
                    })
                    .interact_text()?,
            );
            config.remote_username =
                Some(text(&theme, "Remote username", &config.remote_username)?);

            let keep_password = config.remote_password.is_some()
                && Confirm::with_theme(&theme)
                    .with_prompt("Keep the saved remote password?")
                    .default(true)
                    .interact()?;
            if !keep_password {
                config.remote_password = Some(
                    Password::with_theme(&theme)
                        .with_prompt("Remote password")
                        .interact()?,
                );
            }
        }

        let current_kind = config
            .schedule_interval
            .as_deref()
            .and_then(|s| s.parse::<ScheduleKind>().ok())
            .unwrap_or(ScheduleKind::Daily);
        let default_index = ScheduleKind::ALL
            .iter()
            .position(|k| *k == current_kind)
            .unwrap_or(0);
        let kind = ScheduleKind::ALL[Select::with_theme(&theme)
            .with_prompt("Schedule")
            .items(&ScheduleKind::ALL)
            .default(default_index)
            .interact()?];
        config.schedule_interval = Some(kind.as_str().to_string());

        match kind {
            ScheduleKind::Daily | ScheduleKind::Weekly => {
                let mut input = Input::<String>::with_theme(&theme)
                    .with_prompt("Backup time (HH:MM)")
                    .validate_with(|t: &String| -> Result<(), String> {
                        parse_time_of_day(Some(t.as_str())).map(|_| ()).map_err(|e| e.to_string())
                    });
                if let Some(time) = &config.schedule_time {
                    input = input.default(time.clone());
                }
                config.schedule_time = Some(input.interact_text()?);
                config.custom_interval_minutes = None;
            }
            ScheduleKind::Custom => {
                let minutes = Input::<i64>::with_theme(&theme)
                    .with_prompt("Interval in minutes")
                    .default(config.custom_interval_minutes.unwrap_or(60))
                    .validate_with(|m: &i64| -> Result<(), &'static str> {
                        if *m > 0 {
                            Ok(())
                        } else {
                            Err("interval must be a positive number of minutes")
                        }
                    })
                    .interact_text()?;
                config.custom_interval_minutes = Some(minutes);
                config.schedule_time = None;
            }
        }

        match config.validate() {
            Ok(_) => return Ok(config),
            Err(e) => {
                eprintln!("{} {}", style("Error:").red(), e);
                let retry = Confirm::with_theme(&theme)
                    .with_prompt("Edit the settings again?")
                    .default(true)
                    .interact()?;
                if !retry {
                    return Err(e.into());
                }
            }
        }
    }
}

fn text(theme: &ColorfulTheme, prompt: &str, current: &Option<String>) -> Result<String> {
    let mut input = Input::<String>::with_theme(theme)
        .with_prompt(prompt)
        .validate_with(|s: &String| -> Result<(), &'static str> {
            if s.trim().is_empty() {
                Err("a value is required")
            } else {
                Ok(())
            }
        });
    if let Some(value) = current {
        input = input.default(value.clone());
    }
    Ok(input.interact_text()?.trim().to_string())
}
