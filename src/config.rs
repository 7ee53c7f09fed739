//! Configuration management for logmedic
//!
//! Stores settings in ~/.config/logmedic/config.json. The config is loaded
//! once when the monitor starts and is immutable for the session; changing
//! it means stopping the monitor and starting a fresh one.

use crate::cursor::RotationPolicy;
use crate::error::ConfigError;
use crate::patterns::PatternMatcher;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Model used when the operator never picked one during setup.
pub const DEFAULT_MODEL: &str = "meta-llama/llama-3-8b-instruct";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Master switch for the background monitor.
    pub enabled: bool,
    /// Seconds between scan cycles.
    pub scan_interval_secs: u64,
    /// Regular expressions that classify a log line as an error, evaluated
    /// in order (first match wins).
    pub log_patterns: Vec<String>,
    /// Log files to watch.
    pub sources: Vec<PathBuf>,
    /// Skip the interactive confirmation before running suggested commands.
    pub auto_approve: bool,
    /// OpenRouter model id used for diagnosis.
    pub model: String,
    /// How long an identical error stays suppressed after analysis.
    #[serde(default = "default_dedupe_ttl_secs")]
    pub dedupe_ttl_secs: u64,
    /// Upper bound on remembered dedupe keys (oldest evicted).
    #[serde(default = "default_dedupe_capacity")]
    pub dedupe_capacity: usize,
    /// What to do when a watched file shrinks (rotation/truncation).
    #[serde(default)]
    pub rotation: RotationPolicy,
    /// Stop offering the rest of a command batch after the first decline.
    #[serde(default)]
    pub abort_on_decline: bool,
    /// Seconds a suggested command may run before it is killed.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

fn default_dedupe_ttl_secs() -> u64 {
    3600
}

fn default_dedupe_capacity() -> usize {
    512
}

fn default_command_timeout_secs() -> u64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_interval_secs: 300,
            log_patterns: vec!["error:".to_string(), "exception".to_string()],
            sources: Vec::new(),
            auto_approve: false,
            model: DEFAULT_MODEL.to_string(),
            dedupe_ttl_secs: default_dedupe_ttl_secs(),
            dedupe_capacity: default_dedupe_capacity(),
            rotation: RotationPolicy::default(),
            abort_on_decline: false,
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

const KEYRING_SERVICE: &str = "logmedic";
const KEYRING_USERNAME: &str = "openrouter_api_key";

fn keyring_entry() -> Result<Entry, keyring::Error> {
    Entry::new(KEYRING_SERVICE, KEYRING_USERNAME)
}

fn read_keyring_key() -> Result<Option<String>, keyring::Error> {
    let entry = keyring_entry()?;
    match entry.get_password() {
        Ok(key) => Ok(Some(key)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(err) => Err(err),
    }
}

fn write_keyring_key(key: &str) -> Result<(), keyring::Error> {
    let entry = keyring_entry()?;
    entry.set_password(key)
}

impl Config {
    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("logmedic"))
    }

    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Whether a config file has been written at all.
    pub fn exists() -> bool {
        Self::config_path().map(|p| p.exists()).unwrap_or(false)
    }

    /// Load config from disk, or return default
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if let Ok(content) = fs::read_to_string(&path) {
                match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(err) => {
                        preserve_corrupt_config(&path, &content);
                        eprintln!(
                            "  Warning: Config file was corrupted ({}). A backup was saved and defaults were loaded.",
                            err
                        );
                    }
                }
            }
        }
        Self::default()
    }

    /// Save config to disk
    pub fn save(&self) -> Result<(), String> {
        let dir =
            Self::config_dir().ok_or_else(|| "Could not determine config directory".to_string())?;

        fs::create_dir_all(&dir)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = fs::set_permissions(&dir, fs::Permissions::from_mode(0o700)) {
                eprintln!("  Warning: Failed to set config directory permissions: {}", e);
            }
        }

        let path = dir.join("config.json");
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        #[cfg(unix)]
        {
            write_config_atomic(&path, &content)
                .map_err(|e| format!("Failed to write config: {}", e))?;
        }

        #[cfg(not(unix))]
        {
            fs::write(&path, content).map_err(|e| format!("Failed to write config: {}", e))?;
        }

        Ok(())
    }

    /// Validate everything the monitor needs before it is allowed to start.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Err(ConfigError::Disabled);
        }
        if self.scan_interval_secs == 0 {
            return Err(ConfigError::NonPositiveInterval);
        }
        // Compiling the patterns is the validation.
        PatternMatcher::new(&self.log_patterns)?;
        Ok(())
    }

    /// Get the OpenRouter API key (from environment or keychain)
    pub fn get_api_key() -> Option<String> {
        // Environment variable takes precedence
        if let Ok(key) = std::env::var("OPENROUTER_API_KEY") {
            return Some(key);
        }

        match read_keyring_key() {
            Ok(key) => key,
            Err(err) => {
                eprintln!(
                    "  Warning: Failed to read API key from system keychain: {}",
                    err
                );
                eprintln!("  Tip: Set the OPENROUTER_API_KEY environment variable as a workaround.");
                None
            }
        }
    }

    /// Set and save the API key
    pub fn set_api_key(key: &str) -> Result<(), String> {
        if let Err(write_err) = write_keyring_key(key) {
            return Err(format!(
                "Failed to store API key in system keychain: {}. \
                 You can set the OPENROUTER_API_KEY environment variable instead.",
                write_err
            ));
        }

        // Verify the write succeeded by reading it back
        match read_keyring_key() {
            Ok(Some(stored_key)) if stored_key == key => Ok(()),
            Ok(_) => Err(
                "API key verification failed: key was not persisted to keychain. \
                 You can set the OPENROUTER_API_KEY environment variable instead."
                    .to_string(),
            ),
            Err(read_err) => Err(format!(
                "API key verification failed: couldn't read back from keychain ({}). \
                 You can set the OPENROUTER_API_KEY environment variable instead.",
                read_err
            )),
        }
    }

    /// Check if API key is configured
    pub fn has_api_key() -> bool {
        if std::env::var("OPENROUTER_API_KEY").is_ok() {
            return true;
        }
        matches!(read_keyring_key(), Ok(Some(_)))
    }

    /// Validate API key format (should start with sk-)
    pub fn validate_api_key_format(key: &str) -> bool {
        key.starts_with("sk-")
    }

    /// Get the config file location for display
    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/logmedic/config.json".to_string())
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

#[cfg(unix)]
fn write_config_atomic(path: &Path, content: &str) -> Result<(), String> {
    use std::fs::OpenOptions;
    use std::os::unix::fs::PermissionsExt;

    let tmp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)
        .map_err(|e| e.to_string())?;

    if let Err(e) = file.set_permissions(fs::Permissions::from_mode(0o600)) {
        eprintln!("  Warning: Failed to set temp config file permissions: {}", e);
    }

    file.write_all(content.as_bytes())
        .map_err(|e| e.to_string())?;

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.to_string());
    }
    Ok(())
}
