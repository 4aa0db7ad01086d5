//! Configuration for the Stepwise server
//!
//! Values come from environment variables layered over serde defaults.

use serde::{Deserialize, Serialize};
use std::env;
use tracing::warn;

use crate::error::{ServerError, ServerResult};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Where instance histories are kept
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateStoreKind {
    /// Process-local map, lost on exit
    Memory,
    /// SQLite database at the given URL
    Sqlite(String),
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub bind_address: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// `memory://` or `sqlite://path`
    #[serde(default = "default_state_store_url")]
    pub state_store_url: String,

    /// Log level used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Largest batch accepted in one request
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Wipe every stored instance before serving
    #[serde(default)]
    pub reset_state_on_start: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_state_store_url() -> String {
    "sqlite://.stepwise/state.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_batch_size() -> usize {
    100
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_host(),
            port: default_port(),
            state_store_url: default_state_store_url(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            max_batch_size: default_max_batch_size(),
            reset_state_on_start: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn load() -> ServerResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ServerResult<Self> {
        let mut config = Self::default();

        if let Some(host) = lookup("SERVER_HOST") {
            config.bind_address = host;
        }

        if let Some(port) = lookup("SERVER_PORT") {
            match port.parse::<u16>() {
                Ok(port) => config.port = port,
                Err(_) => warn!("Invalid SERVER_PORT value: {}", port),
            }
        }

        if let Some(url) = lookup("STATE_STORE_URL") {
            config.state_store_url = url;
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            config.log_level = level;
        }

        if let Some(format) = lookup("LOG_FORMAT") {
            match format.to_ascii_lowercase().as_str() {
                "json" => config.log_format = LogFormat::Json,
                "text" => config.log_format = LogFormat::Text,
                _ => warn!("Invalid LOG_FORMAT value: {}", format),
            }
        }

        if let Some(size) = lookup("MAX_BATCH_SIZE") {
            match size.parse::<usize>() {
                Ok(size) if size > 0 => config.max_batch_size = size,
                _ => warn!("Invalid MAX_BATCH_SIZE value: {}", size),
            }
        }

        if let Some(reset) = lookup("RESET_STATE_ON_START") {
            match reset.parse::<bool>() {
                Ok(reset) => config.reset_state_on_start = reset,
                Err(_) => warn!("Invalid RESET_STATE_ON_START value: {}", reset),
            }
        }

        config.state_store()?;
        Ok(config)
    }

    /// Interpret `state_store_url`
    pub fn state_store(&self) -> ServerResult<StateStoreKind> {
        let url = self.state_store_url.trim();
        if url.starts_with("memory://") {
            Ok(StateStoreKind::Memory)
        } else if url.starts_with("sqlite:") {
            Ok(StateStoreKind::Sqlite(url.to_string()))
        } else {
            Err(ServerError::ConfigError(format!(
                "Unsupported state store URL: {}",
                self.state_store_url
            )))
        }
    }

    /// Socket address string to bind
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_batch_size, 100);
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(!config.reset_state_on_start);
        assert_eq!(
            config.state_store().unwrap(),
            StateStoreKind::Sqlite("sqlite://.stepwise/state.db".to_string())
        );
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("SERVER_HOST", "127.0.0.1"),
            ("SERVER_PORT", "9000"),
            ("STATE_STORE_URL", "memory://"),
            ("LOG_FORMAT", "JSON"),
            ("MAX_BATCH_SIZE", "7"),
            ("RESET_STATE_ON_START", "true"),
        ]))
        .unwrap();

        assert_eq!(config.listen_address(), "127.0.0.1:9000");
        assert_eq!(config.state_store().unwrap(), StateStoreKind::Memory);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.max_batch_size, 7);
        assert!(config.reset_state_on_start);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("SERVER_PORT", "not-a-port"),
            ("MAX_BATCH_SIZE", "0"),
            ("LOG_FORMAT", "xml"),
        ]))
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.max_batch_size, 100);
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn test_unsupported_store_is_rejected() {
        let err = ServerConfig::from_lookup(lookup(&[("STATE_STORE_URL", "redis://localhost")]))
            .unwrap_err();
        assert!(matches!(err, ServerError::ConfigError(_)));
    }
}
