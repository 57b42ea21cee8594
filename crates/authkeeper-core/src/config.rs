//! Application configuration management.
//!
//! This module handles loading and saving the configuration: backend base
//! URL, timeouts, the cookie policy for stored credentials and which backend
//! persists them.
//!
//! Configuration is stored at `~/.config/authkeeper/config.json`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::{
    CookieOptions, CredentialBackend, CredentialStore, EncryptedFileBackend, KeyringBackend,
    MemoryBackend,
};

/// Application name used for config/cache directory paths and the keychain service
pub const APP_NAME: &str = "authkeeper";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Sealed credential file name in the cache directory
const CREDENTIALS_FILE: &str = "credentials.sealed";

/// Overrides `base_url` from the config file
pub const BASE_URL_ENV: &str = "AUTHKEEPER_BASE_URL";

/// Passphrase for the encrypted file backend
pub const PASSPHRASE_ENV: &str = "AUTHKEEPER_PASSPHRASE";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Upper bound on a refresh exchange. Waiters are released with a failure after this.
const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Keyring,
    File,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: Option<String>,
    pub request_timeout_secs: u64,
    pub refresh_timeout_secs: u64,
    pub cookie: CookieOptions,
    pub credential_backend: BackendKind,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            refresh_timeout_secs: DEFAULT_REFRESH_TIMEOUT_SECS,
            cookie: CookieOptions::default(),
            credential_backend: BackendKind::default(),
            last_email: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            Ok(serde_json::from_str(&contents).context("Failed to parse config file")?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Base URL for every backend call; the environment wins over the file
    pub fn base_url(&self) -> Result<String> {
        Self::resolve_base_url(std::env::var(BASE_URL_ENV).ok(), self.base_url.as_deref())
    }

    fn resolve_base_url(from_env: Option<String>, from_file: Option<&str>) -> Result<String> {
        from_env
            .filter(|url| !url.trim().is_empty())
            .or_else(|| from_file.map(str::to_string))
            .ok_or_else(|| {
                anyhow::anyhow!("No backend URL configured. Set {} or base_url in the config file", BASE_URL_ENV)
            })
    }

    /// Open the credential store on the configured backend
    pub fn open_credentials(&self) -> Result<CredentialStore> {
        let backend: Box<dyn CredentialBackend> = match self.credential_backend {
            BackendKind::Keyring => Box::new(KeyringBackend::new(APP_NAME)),
            BackendKind::File => {
                let passphrase = std::env::var(PASSPHRASE_ENV)
                    .with_context(|| format!("{} must be set for the file credential backend", PASSPHRASE_ENV))?;
                Box::new(EncryptedFileBackend::new(
                    self.cache_dir()?.join(CREDENTIALS_FILE),
                    passphrase,
                ))
            }
            BackendKind::Memory => Box::new(MemoryBackend::default()),
        };

        CredentialStore::open(backend, self.cookie).context("Failed to open credential store")
    }
}
