//! Configuration loading and types for voxlink
//!
//! Configuration is loaded in layers:
//! 1. Built-in defaults
//! 2. Config file (~/.config/voxlink/config.toml)
//! 3. Environment variables (VOXLINK_*)
//! 4. CLI arguments (highest priority)

use crate::error::VoxlinkError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file content
pub const DEFAULT_CONFIG: &str = r#"# Voxlink Configuration
#
# Location: ~/.config/voxlink/config.toml
# All settings can be overridden via CLI flags

# State file for external integrations (Waybar, polybar, etc.)
# Use "auto" for default location ($XDG_RUNTIME_DIR/voxlink/state),
# a custom path, or "disabled" to turn off. The daemon writes the session
# state ("disconnected", "connecting", "connected", "transmitting", "error")
# to this file whenever it changes. Required for `voxlink status`.
state_file = "auto"

[keys]
# Key to hold for push-to-talk
# Common choices: SCROLLLOCK, PAUSE, F13-F24
# Use `evtest` to find key names for your keyboard
key = "SCROLLLOCK"

# Optional redundant media-route key (e.g. a headset button delivered as a
# media key). Both paths feed the same arbiter; overlapping reports for the
# same hold collapse into one press/release.
# media_key = "PLAYPAUSE"

# Optional modifier keys that must also be held
# Example: modifiers = ["LEFTCTRL", "LEFTALT"]
modifiers = []

# Enable built-in key capture (default: true)
# Set to false when driving the daemon externally via
# `voxlink key press` / `voxlink key release` (SIGUSR1/SIGUSR2).
# enabled = true

[channel]
# Channel joined when the push-to-talk key is held
name = "dispatch-main"

[identity]
# Identity scheme, encoded into the numeric transport UID so receivers can
# classify a sender's role from the UID alone: "dispatcher" or "responder"
scheme = "responder"

# Application user id mapped to a stable numeric UID on first use
app_user_id = "local"

[debounce]
# Hysteresis delay before tearing down an idle channel, in milliseconds.
# A new press within this window reuses the live channel instead of
# reconnecting.
disconnect_delay_ms = 2000

[token]
# Token endpoint; POST {channel, uid, tenant, purpose} -> {token, expires_at}
endpoint = "http://localhost:8402/token"

# Tenant identifier forwarded to the token endpoint
tenant = "default"

# Refresh a cached token when it is within this many seconds of expiry
refresh_margin_secs = 60

[health]
# Fine-grained in-process capture health check interval, in seconds
fine_interval_secs = 5

# Coarse OS-scheduled capture health check interval, in seconds
coarse_interval_secs = 60
"#;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub keys: KeysConfig,

    #[serde(default)]
    pub channel: ChannelConfig,

    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub debounce: DebounceConfig,

    #[serde(default)]
    pub token: TokenConfig,

    #[serde(default)]
    pub health: HealthConfig,

    /// Optional path to state file for external integrations (e.g., Waybar)
    /// When set, the daemon writes the current session state to this file
    /// whenever it changes. Use "auto" for the default location.
    #[serde(default = "default_state_file")]
    pub state_file: Option<String>,
}

/// Key capture configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeysConfig {
    /// Key name (evdev KEY_* constant name, without the KEY_ prefix)
    /// Examples: "SCROLLLOCK", "PAUSE", "F24"
    #[serde(default = "default_ptt_key")]
    pub key: String,

    /// Optional redundant media-route key (headset button etc.)
    #[serde(default)]
    pub media_key: Option<String>,

    /// Optional modifier keys that must also be held
    #[serde(default)]
    pub modifiers: Vec<String>,

    /// Enable built-in key capture (default: true)
    /// When disabled, use `voxlink key press/release` to drive the daemon
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Target channel configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelConfig {
    /// Channel joined when the push-to-talk key is held
    #[serde(default = "default_channel_name")]
    pub name: String,
}

/// Local identity configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdentityConfig {
    /// Identity scheme: "dispatcher" or "responder"
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Application user id mapped to a stable numeric UID
    #[serde(default = "default_app_user_id")]
    pub app_user_id: String,
}

/// Debounce (channel teardown hysteresis) configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DebounceConfig {
    /// Delay before tearing down an idle channel, in milliseconds
    #[serde(default = "default_disconnect_delay_ms")]
    pub disconnect_delay_ms: u64,
}

/// Token endpoint configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenConfig {
    /// Token endpoint URL
    #[serde(default = "default_token_endpoint")]
    pub endpoint: String,

    /// Tenant identifier forwarded to the token endpoint
    #[serde(default = "default_tenant")]
    pub tenant: String,

    /// Refresh a cached token when within this many seconds of expiry
    #[serde(default = "default_refresh_margin_secs")]
    pub refresh_margin_secs: u64,
}

/// Capture health monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthConfig {
    /// Fine-grained in-process check interval, in seconds
    #[serde(default = "default_fine_interval_secs")]
    pub fine_interval_secs: u64,

    /// Coarse OS-scheduled check interval, in seconds
    #[serde(default = "default_coarse_interval_secs")]
    pub coarse_interval_secs: u64,
}

fn default_ptt_key() -> String {
    "SCROLLLOCK".to_string()
}

fn default_channel_name() -> String {
    "dispatch-main".to_string()
}

fn default_scheme() -> String {
    "responder".to_string()
}

fn default_app_user_id() -> String {
    "local".to_string()
}

fn default_disconnect_delay_ms() -> u64 {
    2000
}

fn default_token_endpoint() -> String {
    "http://localhost:8402/token".to_string()
}

fn default_tenant() -> String {
    "default".to_string()
}

fn default_refresh_margin_secs() -> u64 {
    60
}

fn default_fine_interval_secs() -> u64 {
    5
}

fn default_coarse_interval_secs() -> u64 {
    60
}

fn default_state_file() -> Option<String> {
    Some("auto".to_string())
}

fn default_true() -> bool {
    true
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            key: default_ptt_key(),
            media_key: None,
            modifiers: vec![],
            enabled: true,
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: default_channel_name(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            app_user_id: default_app_user_id(),
        }
    }
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            disconnect_delay_ms: default_disconnect_delay_ms(),
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            endpoint: default_token_endpoint(),
            tenant: default_tenant(),
            refresh_margin_secs: default_refresh_margin_secs(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            fine_interval_secs: default_fine_interval_secs(),
            coarse_interval_secs: default_coarse_interval_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            keys: KeysConfig::default(),
            channel: ChannelConfig::default(),
            identity: IdentityConfig::default(),
            debounce: DebounceConfig::default(),
            token: TokenConfig::default(),
            health: HealthConfig::default(),
            state_file: default_state_file(),
        }
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "voxlink")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get the runtime directory for ephemeral files (state, pid)
    pub fn runtime_dir() -> PathBuf {
        // Use XDG_RUNTIME_DIR if available, otherwise fall back to /tmp
        std::env::var("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
            .join("voxlink")
    }

    /// Resolve the state file path from config
    /// Returns None if state_file is not configured or explicitly disabled
    pub fn resolve_state_file(&self) -> Option<PathBuf> {
        self.state_file.as_ref().and_then(|path| {
            match path.to_lowercase().as_str() {
                "disabled" | "none" | "off" | "false" => None,
                "auto" => Some(Self::runtime_dir().join("state")),
                _ => Some(PathBuf::from(path)),
            }
        })
    }

    /// Get the config directory path
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "voxlink")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the data directory path (for the persisted settings store)
    pub fn data_dir() -> PathBuf {
        directories::ProjectDirs::from("", "", "voxlink")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Path of the persisted settings store (identity mappings)
    pub fn settings_path() -> PathBuf {
        Self::data_dir().join("settings.toml")
    }

    /// Ensure all required directories exist
    pub fn ensure_directories() -> std::io::Result<()> {
        if let Some(config_dir) = Self::config_dir() {
            std::fs::create_dir_all(&config_dir)?;
            tracing::debug!("Ensured config directory exists: {:?}", config_dir);
        }

        let data_dir = Self::data_dir();
        std::fs::create_dir_all(&data_dir)?;
        tracing::debug!("Ensured data directory exists: {:?}", data_dir);

        Ok(())
    }
}

/// Load configuration from file, with defaults for missing values
pub fn load_config(path: Option<&Path>) -> Result<Config, VoxlinkError> {
    // Start with defaults
    let mut config = Config::default();

    // Determine config file path
    let config_path = path.map(PathBuf::from).or_else(Config::default_path);

    // Load from file if it exists
    if let Some(ref path) = config_path {
        if path.exists() {
            tracing::debug!("Loading config from {:?}", path);
            let contents = std::fs::read_to_string(path)
                .map_err(|e| VoxlinkError::Config(format!("Failed to read config: {}", e)))?;

            config = toml::from_str(&contents)
                .map_err(|e| VoxlinkError::Config(format!("Invalid config: {}", e)))?;
        } else if Some(path.as_path()) == Config::default_path().as_deref() {
            // First run: write the commented default config for the user
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            match std::fs::write(path, DEFAULT_CONFIG) {
                Ok(()) => tracing::info!("Created default config at {:?}", path),
                Err(e) => tracing::debug!("Could not write default config: {}", e),
            }
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
        }
    }

    // Override from environment variables
    if let Ok(key) = std::env::var("VOXLINK_KEY") {
        config.keys.key = key;
    }
    if let Ok(channel) = std::env::var("VOXLINK_CHANNEL") {
        config.channel.name = channel;
    }
    if let Ok(endpoint) = std::env::var("VOXLINK_TOKEN_ENDPOINT") {
        config.token.endpoint = endpoint;
    }

    Ok(config)
}
