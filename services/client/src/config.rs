//! services/client/src/config.rs
//!
//! Defines the client's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Destinations used on the messaging broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Room topics are `{room_topic_prefix}/{song_id}`.
    pub room_topic_prefix: String,
    /// `None` disables the per-user notification queue.
    pub private_queue: Option<String>,
    pub play_destination: String,
    pub pause_destination: String,
    pub reaction_destination: String,
}

impl ChannelConfig {
    pub fn room_topic(&self, song_id: &str) -> String {
        format!("{}/{}", self.room_topic_prefix.trim_end_matches('/'), song_id)
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            room_topic_prefix: "/broker/canciones".to_string(),
            private_queue: Some("/user/queue/notificaciones".to_string()),
            play_destination: "/app/reproducir".to_string(),
            pause_destination: "/app/detener".to_string(),
            reaction_destination: "/app/reaccionar".to_string(),
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub log_level: Level,
    pub stream_endpoint: String,
    pub song_rpc_path: String,
    pub channel_endpoint: String,
    pub channel: ChannelConfig,
    pub receipt_timeout: Duration,
    pub output_dir: PathBuf,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Streaming backend (gRPC-web proxy) ---
        let stream_endpoint = var_or("STREAM_ENDPOINT", "http://localhost:8080");
        if !stream_endpoint.starts_with("http://") && !stream_endpoint.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "STREAM_ENDPOINT".to_string(),
                format!("'{}' is not an http(s) URL", stream_endpoint),
            ));
        }
        let song_rpc_path = var_or(
            "SONG_RPC_PATH",
            "/servicios.AudioService/enviarCancionMedianteStream",
        );

        // --- Reactions broker ---
        let channel_endpoint = var_or("CHANNEL_ENDPOINT", "ws://localhost:5000/ws/websocket");
        if !channel_endpoint.starts_with("ws://") && !channel_endpoint.starts_with("wss://") {
            return Err(ConfigError::InvalidValue(
                "CHANNEL_ENDPOINT".to_string(),
                format!("'{}' is not a ws(s) URL", channel_endpoint),
            ));
        }

        let defaults = ChannelConfig::default();
        let subscribe_private = match lookup("SUBSCRIBE_PRIVATE_QUEUE") {
            None => true,
            Some(raw) => parse_bool(&raw).ok_or_else(|| {
                ConfigError::InvalidValue(
                    "SUBSCRIBE_PRIVATE_QUEUE".to_string(),
                    format!("'{}' is not a boolean", raw),
                )
            })?,
        };
        let private_queue = subscribe_private.then(|| {
            lookup("PRIVATE_QUEUE").unwrap_or_else(|| "/user/queue/notificaciones".to_string())
        });
        let channel = ChannelConfig {
            room_topic_prefix: lookup("ROOM_TOPIC_PREFIX").unwrap_or(defaults.room_topic_prefix),
            private_queue,
            ..defaults
        };

        let receipt_timeout_str = var_or("RECEIPT_TIMEOUT_MS", "2000");
        let receipt_timeout = receipt_timeout_str
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| ConfigError::InvalidValue("RECEIPT_TIMEOUT_MS".to_string(), e.to_string()))?;

        let output_dir = PathBuf::from(var_or("OUTPUT_DIR", "./downloads"));

        Ok(Self {
            log_level,
            stream_endpoint,
            song_rpc_path,
            channel_endpoint,
            channel,
            receipt_timeout,
            output_dir,
        })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
