//! Configuration management for CrabView
//!
//! Provides loading, saving and validation of the signaling, negotiation and
//! ICE settings used by the connection manager. Files are TOML; the layered
//! loader additionally honours `CRABVIEW__SECTION__KEY` environment overrides.

use crate::errors::StreamError;
use crate::peer::RTCConfiguration;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CrabViewConfig {
    pub signaling: SignalingConfig,
    pub negotiation: NegotiationConfig,
    pub ice: RTCConfiguration,
}

/// Signaling endpoint and send-buffer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Endpoint prefix; the camera id is appended verbatim
    pub base_url: String,
    /// How often a send waiting on a connecting link re-checks it
    pub send_poll_interval_ms: u64,
    /// Upper bound a send waits for the link before it is dropped
    pub send_max_wait_ms: u64,
}

/// Offer/answer negotiation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// Deadline for reaching Connected, measured from session start
    pub timeout_ms: u64,
    /// Consecutive failures tolerated per camera before giving up
    pub max_attempts: u32,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            base_url: "ws://localhost:8080/ws/webrtc/".to_string(),
            send_poll_interval_ms: 50,
            send_max_wait_ms: 5000,
        }
    }
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_attempts: 3,
        }
    }
}

impl SignalingConfig {
    pub fn send_poll_interval(&self) -> Duration {
        Duration::from_millis(self.send_poll_interval_ms)
    }

    pub fn send_max_wait(&self) -> Duration {
        Duration::from_millis(self.send_max_wait_ms)
    }
}

impl NegotiationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl CrabViewConfig {
    /// Default config pointed at a specific signaling endpoint
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.signaling.base_url = base_url.into();
        config
    }

    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, StreamError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| StreamError::Config(format!("Failed to read config file: {}", e)))?;

        let config: CrabViewConfig = toml::from_str(&contents)
            .map_err(|e| StreamError::Config(format!("Failed to parse config file: {}", e)))?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load an optional TOML file with environment overrides layered on top.
    ///
    /// `CRABVIEW__NEGOTIATION__MAX_ATTEMPTS=5` overrides `negotiation.max_attempts`.
    pub fn load_layered<P: AsRef<Path>>(path: P) -> Result<Self, StreamError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix("CRABVIEW")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| StreamError::Config(format!("Failed to assemble config: {}", e)))?;

        let config: CrabViewConfig = settings
            .try_deserialize()
            .map_err(|e| StreamError::Config(format!("Invalid config values: {}", e)))?;

        config.validate().map_err(StreamError::Config)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), StreamError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                StreamError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| StreamError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| StreamError::Config(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("crabview.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        let base = &self.signaling.base_url;
        if !(base.starts_with("ws://") || base.starts_with("wss://")) {
            return Err(format!("Signaling base URL must be ws:// or wss://, got {}", base));
        }
        if self.signaling.send_poll_interval_ms == 0 {
            return Err("Send poll interval must be at least 1ms".to_string());
        }
        if self.signaling.send_max_wait_ms < self.signaling.send_poll_interval_ms {
            return Err("Send max wait must not be shorter than the poll interval".to_string());
        }

        if self.negotiation.timeout_ms == 0 {
            return Err("Negotiation timeout must be positive".to_string());
        }
        if self.negotiation.max_attempts == 0 {
            return Err("Max attempts must be at least 1".to_string());
        }

        if self.ice.ice_servers.iter().any(|s| s.urls.is_empty()) {
            return Err("Every ICE server needs at least one URL".to_string());
        }

        Ok(())
    }
}
