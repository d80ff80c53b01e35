//! Room client configuration.
//!
//! The demo binary reads the server URL, room and display name from the
//! environment.

use std::collections::HashMap;
use std::env;
use thiserror::Error;

/// Default signaling endpoint.
pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:3001/ws";

/// Room client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the room controller (default: "ws://127.0.0.1:3001/ws").
    pub server_url: String,

    /// Room to join.
    pub room_id: String,

    /// Display name announced to the other peers.
    pub display_name: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl ClientConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let server_url = vars
            .get("RC_SERVER_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());
        if !(server_url.starts_with("ws://") || server_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidValue(format!(
                "RC_SERVER_URL must be a ws:// or wss:// URL, got {server_url}"
            )));
        }

        let room_id = required(vars, "RC_ROOM_ID")?;
        let display_name = required(vars, "RC_DISPLAY_NAME")?;

        Ok(Self {
            server_url,
            room_id,
            display_name,
        })
    }
}

fn required(vars: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    vars.get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            ("RC_ROOM_ID".to_string(), "r1".to_string()),
            ("RC_DISPLAY_NAME".to_string(), "alice".to_string()),
        ])
    }

    #[test]
    fn test_from_vars_with_defaults() {
        let config = ClientConfig::from_vars(&base_vars()).unwrap();

        assert_eq!(config.server_url, DEFAULT_SERVER_URL);
        assert_eq!(config.room_id, "r1");
        assert_eq!(config.display_name, "alice");
    }

    #[test]
    fn test_custom_server_url() {
        let mut vars = base_vars();
        vars.insert(
            "RC_SERVER_URL".to_string(),
            "wss://rooms.example.com/ws".to_string(),
        );

        let config = ClientConfig::from_vars(&vars).unwrap();
        assert_eq!(config.server_url, "wss://rooms.example.com/ws");
    }

    #[test]
    fn test_missing_room_or_name() {
        let mut vars = base_vars();
        vars.remove("RC_ROOM_ID");
        let result = ClientConfig::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(key)) if key == "RC_ROOM_ID"));

        let mut vars = base_vars();
        vars.insert("RC_DISPLAY_NAME".to_string(), "   ".to_string());
        let result = ClientConfig::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(key)) if key == "RC_DISPLAY_NAME"));
    }

    #[test]
    fn test_non_websocket_url_rejected() {
        let mut vars = base_vars();
        vars.insert(
            "RC_SERVER_URL".to_string(),
            "http://127.0.0.1:3001".to_string(),
        );

        let result = ClientConfig::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }
}
