//! Failure taxonomy for the monitor pipeline.
//!
//! Failures are contained at the smallest scope that preserves forward
//! progress: one source, one event, or one command never halts the monitor
//! loop. Only a `ConfigError` at startup and an explicit `stop()` do.

use std::path::PathBuf;
use thiserror::Error;

/// Invalid configuration. Fatal at `start()`, never a runtime crash.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("scan interval must be a positive number of seconds")]
    NonPositiveInterval,

    #[error("at least one log pattern is required")]
    NoPatterns,

    #[error("invalid log pattern `{pattern}`: {reason}")]
    BadPattern { pattern: String, reason: String },

    #[error("monitoring is disabled in config (set `enabled` to true)")]
    Disabled,
}

/// A single log source could not be read this cycle. Recoverable: the
/// source is skipped and the cycle continues with the remaining sources.
#[derive(Debug, Error)]
#[error("failed to read {}: {reason}", .path.display())]
pub struct SourceReadError {
    pub path: PathBuf,
    pub reason: String,
}

/// A diagnostic request failed. Recoverable per event: the event is marked
/// failed and the loop continues with subsequent events.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("no API key configured; run `logmedic setup` first")]
    MissingApiKey,

    #[error("authentication rejected; run `logmedic setup` to update the key")]
    Auth,

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl AnalysisError {
    /// Whether a retry could plausibly succeed. Auth problems and a missing
    /// key will fail the same way every time; transport hiccups, 5xx and
    /// rate limits may not.
    pub fn is_retryable(&self) -> bool {
        match self {
            AnalysisError::MissingApiKey | AnalysisError::Auth => false,
            AnalysisError::Transport(_) => true,
            AnalysisError::Api { status, .. } => *status == 429 || *status >= 500,
            AnalysisError::Malformed(_) => true,
        }
    }
}

/// Lifecycle misuse or a configuration problem at startup. Rejected
/// synchronously by the controller.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("monitor is already running")]
    AlreadyRunning,

    #[error("monitor is not running")]
    NotRunning,

    #[error(transparent)]
    Config(#[from] ConfigError),
}
