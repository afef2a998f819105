//! Configuration management for splice
//!
//! Stores settings in ~/.config/splice/config.json and the API key in the
//! system keychain.

use crate::apply::ElementFallback;
use crate::error::{SpliceError, SpliceResult};
use crate::index::{IndexOptions, DEFAULT_EXCLUDED_DIRS, DEFAULT_MAX_CONTEXT_LENGTH};
use crate::llm::models::{DEFAULT_ENDPOINT, DEFAULT_MODEL};
use crate::llm::EngineSettings;
use anyhow::Context;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
const DISABLE_KEYRING_ENV: &str = "SPLICE_DISABLE_KEYRING";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Legacy plaintext key; moved into the keychain on first read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
    /// Directory names skipped while indexing
    pub excluded_dirs: Vec<String>,
    /// Cap, in characters, for the symbol index and the assembled context
    pub max_context_length: usize,
    pub request_timeout_secs: u64,
    pub element_fallback: ElementFallback,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            excluded_dirs: DEFAULT_EXCLUDED_DIRS.iter().map(|s| s.to_string()).collect(),
            max_context_length: DEFAULT_MAX_CONTEXT_LENGTH,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            element_fallback: ElementFallback::default(),
        }
    }
}

/// Settings given on the command line for one run
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub model: Option<String>,
    pub max_context_length: Option<usize>,
    /// Added to the configured set
    pub excluded_dirs: Vec<String>,
    pub element_fallback: Option<ElementFallback>,
}

const KEYRING_SERVICE: &str = "splice";
const KEYRING_USERNAME: &str = "openai_api_key";

fn keyring_disabled() -> bool {
    if cfg!(test) {
        return true;
    }
    matches!(
        std::env::var(DISABLE_KEYRING_ENV)
            .unwrap_or_default()
            .to_lowercase()
            .as_str(),
        "1" | "true" | "yes"
    )
}

fn keyring_entry() -> Result<Entry, keyring::Error> {
    Entry::new(KEYRING_SERVICE, KEYRING_USERNAME)
}

fn read_keyring_key() -> Result<Option<String>, keyring::Error> {
    if keyring_disabled() {
        return Ok(None);
    }
    let entry = keyring_entry()?;
    match entry.get_password() {
        Ok(key) => Ok(Some(key)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(err) => Err(err),
    }
}

fn write_keyring_key(key: &str) -> Result<(), keyring::Error> {
    if keyring_disabled() {
        return Err(keyring::Error::NoStorageAccess(
            format!("keychain disabled via {}", DISABLE_KEYRING_ENV).into(),
        ));
    }
    keyring_entry()?.set_password(key)
}

impl Config {
    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("splice"))
    }

    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk, or return default
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load from a specific file. A corrupt file is set aside and defaults are used.
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(err) => {
                preserve_corrupt_config(path, &content);
                log::warn!(
                    "Config file was corrupted ({}). A backup was saved and defaults were loaded.",
                    err
                );
                Self::default()
            }
        }
    }

    /// Save config to disk
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_path().context("Could not determine config directory")?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Err(e) = fs::set_permissions(dir, fs::Permissions::from_mode(0o700)) {
                    log::warn!("Failed to set config directory permissions: {}", e);
                }
            }
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        write_config_atomic(path, &content).context("Failed to write config")
    }

    /// The config one run uses: this one plus `overrides`.
    ///
    /// The stored config is left alone and the copy never holds the legacy key, so
    /// saving the stored config (as key migration does) cannot persist run-only flags.
    pub fn with_overrides(&self, overrides: &RunOverrides) -> Config {
        let mut config = self.clone();
        config.openai_api_key = None;
        if let Some(model) = &overrides.model {
            config.model = model.clone();
        }
        if let Some(max) = overrides.max_context_length {
            config.max_context_length = max;
        }
        if let Some(fallback) = overrides.element_fallback {
            config.element_fallback = fallback;
        }
        for dir in &overrides.excluded_dirs {
            if !config.excluded_dirs.contains(dir) {
                config.excluded_dirs.push(dir.clone());
            }
        }
        config
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> SpliceResult<()> {
        let endpoint = url::Url::parse(&self.endpoint)
            .map_err(|e| SpliceError::Config(format!("invalid endpoint `{}`: {}", self.endpoint, e)))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(SpliceError::Config(format!(
                "endpoint must be http(s), got `{}`",
                endpoint.scheme()
            )));
        }
        if self.model.trim().is_empty() {
            return Err(SpliceError::Config("model must not be empty".to_string()));
        }
        if self.max_context_length == 0 {
            return Err(SpliceError::Config("max_context_length must be positive".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(SpliceError::Config("request_timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    /// Get the API key (environment, then keychain, then legacy config field)
    pub fn get_api_key(&mut self) -> Option<String> {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                return Some(key.trim().to_string());
            }
        }

        match read_keyring_key() {
            Ok(Some(key)) => return Some(key),
            Ok(None) => {}
            Err(err) => {
                log::warn!("Failed to read API key from system keychain: {}", err);
                log::warn!("Set the {} environment variable as a workaround.", API_KEY_ENV);
            }
        }

        let key = self.openai_api_key.clone()?;
        log::info!("Migrating API key from config file to system keychain");
        match write_keyring_key(&key) {
            Ok(()) => {
                if let Ok(Some(stored)) = read_keyring_key() {
                    if stored == key {
                        self.openai_api_key = None;
                        if let Err(err) = self.save() {
                            log::warn!("Failed to save config after migration: {:#}", err);
                        }
                    }
                }
            }
            Err(err) => log::warn!("Failed to migrate API key to keychain: {}", err),
        }
        Some(key)
    }

    /// Store the API key in the keychain and drop any plaintext copy
    pub fn set_api_key(&mut self, key: &str) -> anyhow::Result<()> {
        write_keyring_key(key).with_context(|| {
            format!(
                "Failed to store API key in system keychain. You can set {} instead",
                API_KEY_ENV
            )
        })?;

        match read_keyring_key() {
            Ok(Some(stored)) if stored == key => {
                self.openai_api_key = None;
                self.save()
            }
            Ok(_) => anyhow::bail!(
                "API key verification failed: key was not persisted to keychain. You can set {} instead",
                API_KEY_ENV
            ),
            Err(err) => anyhow::bail!(
                "API key verification failed: couldn't read back from keychain ({}). You can set {} instead",
                err,
                API_KEY_ENV
            ),
        }
    }

    /// Validate API key format (should start with sk-)
    pub fn validate_api_key_format(key: &str) -> bool {
        key.starts_with("sk-")
    }

    pub fn index_options(&self) -> IndexOptions {
        IndexOptions {
            excluded_dirs: self.excluded_dirs.clone(),
            max_length: self.max_context_length,
        }
    }

    pub fn engine_settings(&self, api_key: String) -> EngineSettings {
        EngineSettings {
            api_key,
            model: self.model.clone(),
            endpoint: self.endpoint.clone(),
            timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    /// Get the config file location for display
    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/splice/config.json".to_string())
    }
}

/// Interactive prompt to set up the API key
pub fn setup_api_key_interactive() -> anyhow::Result<()> {
    use std::io::{self, Write};

    println!();
    println!("  splice sends your task and the relevant code to an OpenAI-compatible");
    println!("  Responses endpoint. The key is saved in your system keychain.");
    println!();
    print!("  API Key: ");
    io::stdout().flush()?;

    let mut key = String::new();
    io::stdin().read_line(&mut key)?;
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("No API key provided");
    }

    if !Config::validate_api_key_format(key) {
        println!();
        println!("  Warning: Key doesn't look like an OpenAI key (should start with sk-)");
        println!("     Saving anyway...");
    }

    let mut config = Config::load();
    config.set_api_key(key)?;

    println!();
    println!("  + API key saved. Settings live in {}", Config::config_location());
    println!();
    Ok(())
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

fn write_config_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    use std::fs::OpenOptions;
    use std::io::Write;

    let tmp_path = path.with_extension("tmp");
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(&tmp_path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;
    drop(file);

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}
