//! Runtime configuration for mobile-chat.
//!
//! Configuration is loaded from a JSON file or constructed programmatically.
//! The persisted model choice is not part of it; that lives in [`crate::settings`].

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::model::template::DEFAULT_SYSTEM_PROMPT;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "mobile-chat", about = "Chat with a small on-device language model")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Path to the persisted settings file (overrides the config file).
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Switch to this model at startup (e.g. "smollm", "TinyLlama").
    #[arg(short, long)]
    pub model: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model backend configuration.
    pub model: ModelConfig,

    /// Session controller tuning.
    pub session: SessionConfig,

    /// Settings persistence.
    pub settings: SettingsConfig,
}

/// Where model weights live and how missing ones are fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Directory holding cached GGUF files.
    pub models_dir: PathBuf,

    /// Fetch weights remotely when no cached file exists.
    pub allow_download: bool,

    /// Number of progress steps reported during a fetch.
    pub download_chunks: u32,

    /// Delay per fetch step in milliseconds.
    pub chunk_delay_ms: u64,

    /// Simulated reply latency in milliseconds.
    pub reply_delay_ms: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            models_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("mobile-chat")
                .join("models"),
            allow_download: true,
            download_chunks: 20,
            chunk_delay_ms: 50,
            reply_delay_ms: 300,
        }
    }
}

/// Session controller settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// System prompt given to the model.
    pub system_prompt: String,

    /// Capacity of the command queue into the controller.
    pub command_buffer: usize,

    /// Capacity of the event broadcast channel.
    pub event_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            command_buffer: 32,
            event_buffer: 256,
        }
    }
}

/// Settings persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// JSON file holding persisted settings.
    pub path: PathBuf,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            path: dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("mobile-chat")
                .join("settings.json"),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }
}
