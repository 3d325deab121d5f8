//! TOML-based configuration persistence for the kernel server.
//!
//! Reads and writes `ServerConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\KernelServer\config.toml`
//! - Linux:    `~/.config/kernel-server/config.toml`
//! - macOS:    `~/Library/Application Support/KernelServer/config.toml`
//!
//! Example file:
//!
//! ```toml
//! [server]
//! poll_interval_sec = 0.01
//! log_level = "info"
//!
//! [channels]
//! control = "notifier"
//! shell = "notifier"
//! stdin = "poll"
//! ```
//!
//! # Serde default values
//!
//! Every field carries `#[serde(default = ...)]`, so a missing file, a missing
//! section, or a missing key all fall back to the built-in defaults.  On a
//! platform where stdin's native notifier works, flipping `stdin` to
//! `"notifier"` is the only line a user needs.

use std::path::{Path, PathBuf};

use kernel_core::Channel;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::channel_plan::{ChannelPlan, PlanError, WatchStrategy};
use crate::application::lifecycle::ServerSettings;
use crate::application::poll_fallback::{
    InvalidPollInterval, PollInterval, DEFAULT_POLL_INTERVAL_SEC,
};
use crate::infrastructure::logging;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// `poll_interval_sec` is not a positive number of seconds.
    #[error("invalid server config: {0}")]
    InvalidPollInterval(#[from] InvalidPollInterval),

    /// `[channels]` watches a channel that never receives requests.
    #[error("invalid server config: {0}")]
    InvalidPlan(#[from] PlanError),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level server configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

/// General server behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    /// Seconds between poll-fallback ticks.  Must be positive.
    #[serde(default = "default_poll_interval_sec")]
    pub poll_interval_sec: f64,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Readiness mechanism for each kernel channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelsConfig {
    #[serde(default = "default_notifier")]
    pub control: WatchStrategy,
    #[serde(default = "default_notifier")]
    pub shell: WatchStrategy,
    #[serde(default = "default_poll")]
    pub stdin: WatchStrategy,
    #[serde(default = "default_unwatched")]
    pub iopub: WatchStrategy,
    #[serde(default = "default_unwatched")]
    pub heartbeat: WatchStrategy,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_poll_interval_sec() -> f64 {
    DEFAULT_POLL_INTERVAL_SEC
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_notifier() -> WatchStrategy {
    WatchStrategy::Notifier
}
fn default_poll() -> WatchStrategy {
    WatchStrategy::Poll
}
fn default_unwatched() -> WatchStrategy {
    WatchStrategy::Unwatched
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            poll_interval_sec: default_poll_interval_sec(),
            log_level: default_log_level(),
        }
    }
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            control: default_notifier(),
            shell: default_notifier(),
            stdin: default_poll(),
            iopub: default_unwatched(),
            heartbeat: default_unwatched(),
        }
    }
}

impl ChannelsConfig {
    pub fn strategy(&self, channel: Channel) -> WatchStrategy {
        match channel {
            Channel::Control => self.control,
            Channel::Shell => self.shell,
            Channel::Stdin => self.stdin,
            Channel::IoPub => self.iopub,
            Channel::Heartbeat => self.heartbeat,
        }
    }

    pub fn to_plan(&self) -> ChannelPlan {
        Channel::ALL
            .iter()
            .fold(ChannelPlan::all_unwatched(), |plan, channel| {
                plan.with(*channel, self.strategy(*channel))
            })
    }
}

impl ServerConfig {
    /// Converts the on-disk values into validated server settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPollInterval`] when `poll_interval_sec`
    /// is zero, negative, or not a finite number, and
    /// [`ConfigError::InvalidPlan`] when `iopub` or `heartbeat` is watched.
    pub fn settings(&self) -> Result<ServerSettings, ConfigError> {
        let plan = self.channels.to_plan();
        plan.validate()?;
        Ok(ServerSettings {
            poll_interval: PollInterval::from_secs(self.server.poll_interval_sec)?,
            plan,
        })
    }

    /// Installs the global tracing subscriber at the configured `log_level`.
    ///
    /// Returns `false` if the host already installed one.
    pub fn init_logging(&self) -> bool {
        logging::init_tracing(&self.server.log_level)
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `ServerConfig` from the platform config file.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<ServerConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `ServerConfig` from `path`, returning `ServerConfig::default()` if the
/// file does not yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<ServerConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists `config` to the platform config file.
///
/// # Errors
///
/// See [`save_config_to`].
pub fn save_config(config: &ServerConfig) -> Result<(), ConfigError> {
    save_config_to(config, &config_file_path()?)
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &ServerConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config base directory including the app subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("KernelServer"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("kernel-server"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("KernelServer")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
