//! Configuration management for the rovercam agent
//!
//! Provides configuration loading, saving, and validation for the signaling
//! relay connection, video capture settings, and transport parameters.

use crate::errors::AgentError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable that overrides the configured relay URL.
pub const SIGNALING_URL_ENV: &str = "ROVERCAM_SIGNALING_URL";

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub signaling: SignalingSettings,
    pub video: VideoSettings,
    pub transport: TransportSettings,
}

/// Signaling relay connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingSettings {
    /// Relay WebSocket URL
    pub url: String,
    /// Initial reconnect delay in milliseconds
    pub reconnect_initial_ms: u64,
    /// Maximum reconnect delay in milliseconds (backoff cap)
    pub reconnect_max_ms: u64,
}

/// Outbound video settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoSettings {
    /// Capture width in pixels
    pub width: u32,
    /// Capture height in pixels
    pub height: u32,
    /// Frames per second
    pub fps: u32,
    /// Capture device identifier
    pub device_id: String,
}

/// Transport engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSettings {
    /// STUN/TURN server URLs handed to the transport engine
    pub stun_servers: Vec<String>,
    /// Label of the in-session command channel
    pub command_channel_label: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            signaling: SignalingSettings {
                url: "ws://localhost:3001".to_string(),
                reconnect_initial_ms: 500,
                reconnect_max_ms: 15_000,
            },
            video: VideoSettings {
                width: 640,
                height: 480,
                fps: 30,
                device_id: "0".to_string(),
            },
            transport: TransportSettings {
                stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
                command_channel_label: "control".to_string(),
            },
        }
    }
}

impl AgentConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, AgentError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default().with_env_overrides());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| AgentError::Config(format!("Failed to read config file: {}", e)))?;

        let config: AgentConfig = toml::from_str(&contents)
            .map_err(|e| AgentError::Config(format!("Failed to parse config file: {}", e)))?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config.with_env_overrides())
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), AgentError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                AgentError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| AgentError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| AgentError::Config(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("rovercam.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default().with_env_overrides()
        })
    }

    /// Apply environment overrides on top of file/default values
    fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(SIGNALING_URL_ENV) {
            if !url.is_empty() {
                log::info!("Relay URL overridden from {}", SIGNALING_URL_ENV);
                self.signaling.url = url;
            }
        }
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.signaling.url.is_empty() {
            return Err("Signaling URL must not be empty".to_string());
        }
        if !self.signaling.url.starts_with("ws://") && !self.signaling.url.starts_with("wss://") {
            return Err("Signaling URL must be a ws:// or wss:// address".to_string());
        }
        if self.signaling.reconnect_initial_ms == 0 {
            return Err("Reconnect initial delay must be at least 1ms".to_string());
        }
        if self.signaling.reconnect_max_ms < self.signaling.reconnect_initial_ms {
            return Err("Reconnect max delay must be >= initial delay".to_string());
        }

        if self.video.width == 0 || self.video.height == 0 {
            return Err("Invalid video resolution".to_string());
        }
        if self.video.fps == 0 || self.video.fps > 240 {
            return Err("Invalid FPS (must be 1-240)".to_string());
        }

        if self.transport.command_channel_label.is_empty() {
            return Err("Command channel label must not be empty".to_string());
        }

        Ok(())
    }
}
