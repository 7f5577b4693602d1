//! Encrypted configuration storage.
//!
//! The settings are kept as a JSON document encrypted with AES-256-GCM. Two
//! files live side by side in the configuration directory:
//!
//! - `key.key`: the base64 encoded 256-bit key, generated on first save
//! - `config.json`: base64 of `nonce (12 bytes) || ciphertext`
//!
//! Anyone who can read the directory can decrypt the configuration; the
//! encryption only keeps the password out of casual view.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use directories::ProjectDirs;
use rand::RngCore;
use tracing::{debug, info};

use crate::config::{RawConfig, SyncConfiguration};
use crate::error::EngineError;

pub const CONFIG_FILE_NAME: &str = "config.json";
pub const KEY_FILE_NAME: &str = "key.key";
pub const LOG_FILE_NAME: &str = "backup.log";

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Location of the encrypted configuration and its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    /// Store rooted at an explicit directory.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        ConfigStore { dir: dir.into() }
    }

    /// Store in the platform configuration directory for `mirrorsync`.
    ///
    /// # Errors
    /// `EngineError::Configuration` when no home directory can be determined.
    pub fn default_location() -> Result<Self, EngineError> {
        let dirs = ProjectDirs::from("", "", "mirrorsync").ok_or_else(|| {
            EngineError::configuration("could not determine the configuration directory")
        })?;
        Ok(Self::in_dir(dirs.config_dir()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE_NAME)
    }

    pub fn key_path(&self) -> PathBuf {
        self.dir.join(KEY_FILE_NAME)
    }

    /// Default location of the run log, next to the configuration.
    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE_NAME)
    }

    pub fn exists(&self) -> bool {
        self.config_path().is_file()
    }

    /// Encrypt and write `config`, generating a key on first use.
    pub fn save(&self, config: &RawConfig) -> Result<(), EngineError> {
        fs::create_dir_all(&self.dir).map_err(|e| self.store_error(&self.dir, e))?;
        let key = self.load_or_create_key()?;

        let plaintext = serde_json::to_vec_pretty(config).map_err(|e| EngineError::Encryption {
            reason: format!("cannot serialize configuration: {}", e),
        })?;
        let blob = encrypt(&key, &plaintext)?;

        let path = self.config_path();
        fs::write(&path, BASE64.encode(blob)).map_err(|e| self.store_error(&path, e))?;
        info!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Read and decrypt the stored settings.
    ///
    /// # Errors
    /// `EngineError::ConfigNotFound` when nothing has been saved yet,
    /// `EngineError::Encryption` when the key does not match or the blob was
    /// tampered with.
    pub fn load(&self) -> Result<RawConfig, EngineError> {
        let path = self.config_path();
        let encoded = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(EngineError::ConfigNotFound { path })
            }
            Err(e) => return Err(self.store_error(&path, e)),
        };

        let key = self.load_key()?;
        let blob = BASE64
            .decode(encoded.trim())
            .map_err(|e| EngineError::Encryption {
                reason: format!("configuration is not valid base64: {}", e),
            })?;
        let plaintext = decrypt(&key, &blob)?;

        let config = serde_json::from_slice(&plaintext).map_err(|e| {
            EngineError::configuration(format!("stored configuration is malformed: {}", e))
        })?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Load and validate in one step.
    pub fn load_configuration(&self) -> Result<SyncConfiguration, EngineError> {
        self.load()?.validate()
    }

    /// Read the key file.
    ///
    /// # Errors
    /// `EngineError::ConfigNotFound` when the key file is absent.
    pub fn load_key(&self) -> Result<Vec<u8>, EngineError> {
        let path = self.key_path();
        let encoded = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(EngineError::ConfigNotFound { path })
            }
            Err(e) => return Err(self.store_error(&path, e)),
        };
        let key = BASE64
            .decode(encoded.trim())
            .map_err(|e| EngineError::Encryption {
                reason: format!("key file is not valid base64: {}", e),
            })?;
        if key.len() != KEY_LEN {
            return Err(EngineError::Encryption {
                reason: format!("key must be {} bytes, found {}", KEY_LEN, key.len()),
            });
        }
        Ok(key)
    }

    /// Return the existing key or create and persist a new one.
    pub fn load_or_create_key(&self) -> Result<Vec<u8>, EngineError> {
        match self.load_key() {
            Ok(key) => Ok(key),
            Err(EngineError::ConfigNotFound { .. }) => {
                let mut key = vec![0u8; KEY_LEN];
                rand::thread_rng().fill_bytes(&mut key);
                let path = self.key_path();
                fs::create_dir_all(&self.dir).map_err(|e| self.store_error(&self.dir, e))?;
                fs::write(&path, BASE64.encode(&key)).map_err(|e| self.store_error(&path, e))?;
                info!(path = %path.display(), "generated new configuration key");
                Ok(key)
            }
            Err(e) => Err(e),
        }
    }

    fn store_error(&self, path: &Path, source: io::Error) -> EngineError {
        EngineError::ConfigStore {
            path: path.to_path_buf(),
            source,
        }
    }
}

fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, EngineError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| EngineError::Encryption {
        reason: e.to_string(),
    })?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| EngineError::Encryption {
            reason: e.to_string(),
        })?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

fn decrypt(key: &[u8], blob: &[u8]) -> Result<Vec<u8>, EngineError> {
    if blob.len() < NONCE_LEN {
        return Err(EngineError::Encryption {
            reason: "configuration blob too short".to_string(),
        });
    }
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| EngineError::Encryption {
        reason: e.to_string(),
    })?;
    let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| EngineError::Encryption {
            reason: "configuration could not be decrypted with the stored key".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RawConfig {
        RawConfig {
            local_sync: true,
            sftp_sync: true,
            source_folder: Some("/home/user/documents".to_string()),
            local_backup_folder: Some("/mnt/backup".to_string()),
            remote_backup_directory: Some("/srv/backup".to_string()),
            remote_host: Some("backup.example.org".to_string()),
            remote_port: Some(2222),
            remote_username: Some("user".to_string()),
            remote_password: Some("s3cret".to_string()),
            schedule_interval: Some("weekly".to_string()),
            schedule_time: Some("03:30".to_string()),
            ..RawConfig::default()
        }
    }

    #[test]
    fn test_save_then_load() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = ConfigStore::in_dir(temp_dir.path().join("conf"));

        store.save(&sample()).expect("save");
        assert!(store.exists());
        assert!(store.key_path().is_file());
        assert_eq!(store.load().expect("load"), sample());

        let config = store.load_configuration().expect("valid");
        assert_eq!(config.remote.expect("remote").port, 2222);
    }

    #[test]
    fn test_password_not_stored_in_clear() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = ConfigStore::in_dir(temp_dir.path());
        store.save(&sample()).expect("save");

        let raw = fs::read_to_string(store.config_path()).expect("read");
        assert!(!raw.contains("s3cret"));
        assert!(!raw.contains("remote_host"));
    }

    #[test]
    fn test_key_is_reused_across_saves() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = ConfigStore::in_dir(temp_dir.path());
        store.save(&sample()).expect("first save");
        let key = store.load_key().expect("key");

        let mut updated = sample();
        updated.local_sync = false;
        store.save(&updated).expect("second save");

        assert_eq!(store.load_key().expect("key"), key);
        assert!(!store.load().expect("load").local_sync);
    }

    #[test]
    fn test_missing_config_is_not_found() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = ConfigStore::in_dir(temp_dir.path());
        assert!(matches!(store.load(), Err(EngineError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_wrong_key_fails_to_decrypt() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = ConfigStore::in_dir(temp_dir.path());
        store.save(&sample()).expect("save");

        fs::write(store.key_path(), BASE64.encode([7u8; KEY_LEN])).expect("overwrite key");
        assert!(matches!(store.load(), Err(EngineError::Encryption { .. })));
    }

    #[test]
    fn test_truncated_key_is_rejected() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = ConfigStore::in_dir(temp_dir.path());
        fs::write(store.key_path(), BASE64.encode([1u8; 8])).expect("write key");
        assert!(matches!(
            store.load_key(),
            Err(EngineError::Encryption { .. })
        ));
    }
}
