//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::Level;

/// How the chat dispatcher reaches a provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoutingMode {
    /// Default: go through the server-side relay so keys stay off clients.
    Relay,
    /// Compatibility fallback: call the provider directly with a locally
    /// cached key.
    Direct,
}

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    /// Where the dispatcher posts relay requests. Defaults to this server's
    /// own relay endpoint.
    pub relay_url: String,
    pub routing_mode: RoutingMode,
    /// Explicit location of the anonymous-session mirror file; when unset,
    /// the platform data directory is used.
    pub local_store_path: Option<PathBuf>,
    pub allowed_origin: String,
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

        // --- Load Server and Database Settings ---
        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Chat Routing Settings ---
        let relay_url = std::env::var("RELAY_URL")
            .unwrap_or_else(|_| format!("http://{}/ai-chat", bind_address));

        let routing_mode = match std::env::var("ROUTING_MODE")
            .unwrap_or_else(|_| "relay".to_string())
            .to_lowercase()
            .as_str()
        {
            "relay" => RoutingMode::Relay,
            "direct" => RoutingMode::Direct,
            other => {
                return Err(ConfigError::InvalidValue(
                    "ROUTING_MODE".to_string(),
                    format!("'{}' is not 'relay' or 'direct'", other),
                ))
            }
        };

        let local_store_path = std::env::var("LOCAL_STORE_PATH").map(PathBuf::from).ok();

        let allowed_origin = std::env::var("ALLOWED_ORIGIN")
            .unwrap_or_else(|_| "http://localhost:5173".to_string());

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            relay_url,
            routing_mode,
            local_store_path,
            allowed_origin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_mode_defaults_to_relay() {
        std::env::set_var("DATABASE_URL", "postgres://localhost/greenbot_test");
        std::env::remove_var("ROUTING_MODE");
        let config = Config::from_env().expect("config should load");
        assert_eq!(config.routing_mode, RoutingMode::Relay);
        assert!(config.relay_url.ends_with("/ai-chat"));
    }
}
