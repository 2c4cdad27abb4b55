//! Persistent configuration (JSON under the platform config dir)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::constants::{config, discovery, editor};
use crate::sync::SyncSettings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// Overridden by the LOG_LEVEL environment variable
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub editor: EditorSettings,

    #[serde(default)]
    pub discovery: DiscoverySettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub window: WindowSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditorSettings {
    #[serde(default = "default_command")]
    pub command: String,

    /// Placed before the document path
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Time the editor gets to exit after SIGTERM before it is killed
    #[serde(default = "default_terminate_grace_ms")]
    pub terminate_grace_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoverySettings {
    #[serde(default = "default_discovery_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSettings {
    #[serde(default = "default_true")]
    pub strip_decorations: bool,

    #[serde(default = "default_true")]
    pub keep_above: bool,
}

fn default_log_level() -> String {
    config::DEFAULT_LOG_LEVEL.to_string()
}

fn default_command() -> String {
    editor::DEFAULT_COMMAND.to_string()
}

fn default_args() -> Vec<String> {
    editor::DEFAULT_ARGS.iter().map(|s| s.to_string()).collect()
}

fn default_terminate_grace_ms() -> u64 {
    editor::DEFAULT_TERMINATE_GRACE_MS
}

fn default_discovery_timeout_ms() -> u64 {
    discovery::DEFAULT_TIMEOUT_MS
}

fn default_poll_interval_ms() -> u64 {
    discovery::DEFAULT_POLL_INTERVAL_MS
}

fn default_true() -> bool {
    true
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            editor: EditorSettings::default(),
            discovery: DiscoverySettings::default(),
            sync: SyncSettings::default(),
            window: WindowSettings::default(),
        }
    }
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: default_args(),
            terminate_grace_ms: default_terminate_grace_ms(),
        }
    }
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_discovery_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            strip_decorations: true,
            keep_above: true,
        }
    }
}

impl EditorSettings {
    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }
}

impl DiscoverySettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl OverlayConfig {
    pub fn config_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(config::APP_DIR);
        path.push(config::FILENAME);
        path
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: OverlayConfig = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse JSON config from {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config in {}", path.display()))?;

        info!(path = %path.display(), editor = %config.editor.command, "Loaded config");
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize config to JSON")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        info!(path = %path.display(), "Saved config");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.editor.command.trim().is_empty(),
            "editor.command must not be empty"
        );
        anyhow::ensure!(self.discovery.timeout_ms > 0, "discovery.timeout_ms must be positive");
        anyhow::ensure!(
            self.discovery.poll_interval_ms > 0,
            "discovery.poll_interval_ms must be positive"
        );
        self.sync.validate().context("Invalid sync settings")?;
        Ok(())
    }
}
