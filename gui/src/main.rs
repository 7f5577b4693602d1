mod state;

use engine::{ConfigStore, EngineError, ScheduleKind};
use iced::widget::{button, checkbox, column, container, pick_list, row, text, text_input};
use iced::{Alignment, Element, Length, Sandbox, Settings};
use state::AppState;

pub fn main() -> iced::Result {
    SetupApp::run(Settings::default())
}

#[derive(Debug, Clone)]
pub enum Message {
    LocalSyncToggled(bool),
    SftpSyncToggled(bool),
    SourceFolderChanged(String),
    LocalBackupFolderChanged(String),
    RemoteBackupDirectoryChanged(String),
    RemoteHostChanged(String),
    RemotePortChanged(String),
    RemoteUsernameChanged(String),
    RemotePasswordChanged(String),
    ScheduleKindChanged(ScheduleKind),
    ScheduleTimeChanged(String),
    CustomIntervalChanged(String),
    BrowseSourcePressed,
    BrowseLocalBackupPressed,
    SavePressed,
}

pub struct SetupApp {
    state: AppState,
    store: Option<ConfigStore>,
}

impl Sandbox for SetupApp {
    type Message = Message;

    fn new() -> Self {
        let store = ConfigStore::default_location();
        let mut state = match &store {
            Ok(store) => match store.load() {
                Ok(raw) => AppState::from_raw(&raw),
                Err(EngineError::ConfigNotFound { .. }) => AppState::new(),
                Err(e) => AppState {
                    error_message: Some(format!("Existing configuration not loaded: {}", e)),
                    ..AppState::new()
                },
            },
            Err(e) => AppState {
                error_message: Some(e.to_string()),
                ..AppState::new()
            },
        };
        if let Ok(store) = &store {
            if store.exists() && state.error_message.is_none() {
                state.status_message = Some(format!("Editing {}", store.config_path().display()));
            }
        }

        SetupApp {
            state,
            store: store.ok(),
        }
    }

    fn title(&self) -> String {
        "mirrorsync - Setup".to_string()
    }

    fn update(&mut self, message: Message) {
        match message {
            Message::LocalSyncToggled(enabled) => self.state.local_sync = enabled,
            Message::SftpSyncToggled(enabled) => self.state.sftp_sync = enabled,
            Message::SourceFolderChanged(path) => self.state.source_folder = path,
            Message::LocalBackupFolderChanged(path) => self.state.local_backup_folder = path,
            Message::RemoteBackupDirectoryChanged(path) => {
                self.state.remote_backup_directory = path
            }
            Message::RemoteHostChanged(host) => self.state.remote_host = host,
            Message::RemotePortChanged(port) => self.state.remote_port = port,
            Message::RemoteUsernameChanged(name) => self.state.remote_username = name,
            Message::RemotePasswordChanged(password) => self.state.remote_password = password,
            Message::ScheduleKindChanged(kind) => self.state.schedule_kind = kind,
            Message::ScheduleTimeChanged(time) => self.state.schedule_time = time,
            Message::CustomIntervalChanged(minutes) => {
                self.state.custom_interval_minutes = minutes
            }
            Message::BrowseSourcePressed => {
                if let Some(path) = rfd::FileDialog::new().pick_folder() {
                    self.state.source_folder = path.display().to_string();
                }
            }
            Message::BrowseLocalBackupPressed => {
                if let Some(path) = rfd::FileDialog::new().pick_folder() {
                    self.state.local_backup_folder = path.display().to_string();
                }
            }
            Message::SavePressed => match &self.store {
                Some(store) => self.state.save(store),
                None => {
                    self.state.error_message =
                        Some("No configuration directory is available".to_string())
                }
            },
        }
    }

    fn view(&self) -> Element<Message> {
        let folders = column![
            row![
                checkbox("Local sync", self.state.local_sync).on_toggle(Message::LocalSyncToggled),
                checkbox("SFTP sync", self.state.sftp_sync).on_toggle(Message::SftpSyncToggled),
            ]
            .spacing(20),
            text("Source Folder"),
            row![
                text_input("Folder to back up", &self.state.source_folder)
                    .on_input(Message::SourceFolderChanged)
                    .width(Length::Fill),
                button("Browse...").on_press(Message::BrowseSourcePressed),
            ]
            .spacing(10)
            .align_items(Alignment::Center),
        ]
        .spacing(10)
        .padding(10);

        let mut form = column![folders].spacing(10);

        if self.state.local_sync {
            form = form.push(
                column![
                    text("Local Backup Folder"),
                    row![
                        text_input("Mirror destination", &self.state.local_backup_folder)
                            .on_input(Message::LocalBackupFolderChanged)
                            .width(Length::Fill),
                        button("Browse...").on_press(Message::BrowseLocalBackupPressed),
                    ]
                    .spacing(10)
                    .align_items(Alignment::Center),
                ]
                .spacing(10)
                .padding(10),
            );
        }

        if self.state.sftp_sync {
            form = form.push(
                column![
                    text("Remote Backup Directory"),
                    text_input("/srv/backup", &self.state.remote_backup_directory)
                        .on_input(Message::RemoteBackupDirectoryChanged),
                    row![
                        column![
                            text("Host"),
                            text_input("backup.example.org", &self.state.remote_host)
                                .on_input(Message::RemoteHostChanged),
                        ]
                        .width(Length::FillPortion(3)),
                        column![
                            text("Port"),
                            text_input("22", &self.state.remote_port)
                                .on_input(Message::RemotePortChanged),
                        ]
                        .width(Length::FillPortion(1)),
                    ]
                    .spacing(15),
                    row![
                        column![
                            text("Username"),
                            text_input("", &self.state.remote_username)
                                .on_input(Message::RemoteUsernameChanged),
                        ]
                        .width(Length::FillPortion(1)),
                        column![
                            text("Password"),
                            text_input("", &self.state.remote_password)
                                .on_input(Message::RemotePasswordChanged)
                                .secure(true),
                        ]
                        .width(Length::FillPortion(1)),
                    ]
                    .spacing(15),
                ]
                .spacing(10)
                .padding(10),
            );
        }

        let schedule_value: Element<Message> = match self.state.schedule_kind {
            ScheduleKind::Daily | ScheduleKind::Weekly => column![
                text("Time (HH:MM)"),
                text_input("19:00", &self.state.schedule_time).on_input(Message::ScheduleTimeChanged),
            ]
            .into(),
            ScheduleKind::Custom => column![
                text("Interval (minutes)"),
                text_input("60", &self.state.custom_interval_minutes)
                    .on_input(Message::CustomIntervalChanged),
            ]
            .into(),
        };

        let schedule = row![
            column![
                text("Schedule"),
                pick_list(
                    &ScheduleKind::ALL[..],
                    Some(self.state.schedule_kind),
                    Message::ScheduleKindChanged,
                ),
            ]
            .width(Length::FillPortion(1)),
            container(schedule_value).width(Length::FillPortion(1)),
        ]
        .spacing(15)
        .padding(10);

        let save_button = button("Save Configuration")
            .on_press_maybe(self.store.as_ref().map(|_| Message::SavePressed))
            .padding(10);

        let status: Element<Message> = if let Some(error) = &self.state.error_message {
            container(text(format!("ERROR: {}", error))).padding(10).into()
        } else if let Some(status) = &self.state.status_message {
            container(text(status)).padding(10).into()
        } else {
            text("").into()
        };

        column![
            text("mirrorsync - Backup Setup").size(24),
            form,
            schedule,
            save_button,
            status,
        ]
        .spacing(20)
        .padding(20)
        .into()
    }
}
