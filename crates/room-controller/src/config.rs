//! Room Controller configuration.
//!
//! Configuration is loaded from environment variables. The listen and
//! announced IPs are handed to the media engine untouched.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use thiserror::Error;

/// Default WebSocket/HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3001";

/// Default IP the media engine listens on.
pub const DEFAULT_LISTEN_IP: &str = "127.0.0.1";

/// Default lower bound of the engine's RTC port range.
pub const DEFAULT_RTC_MIN_PORT: u16 = 40000;

/// Default upper bound of the engine's RTC port range.
pub const DEFAULT_RTC_MAX_PORT: u16 = 49999;

/// Default capacity of each connection's outbound queue.
pub const DEFAULT_NOTIFICATION_BUFFER: usize = 256;

/// Default maximum WebSocket message size (64 KiB; signaling frames are small).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Default instance ID prefix.
pub const DEFAULT_RC_ID_PREFIX: &str = "rc";

/// Room Controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listener for `/ws`, `/health`, `/ready` and `/metrics` (default: "0.0.0.0:3001").
    pub bind_address: String,

    /// IP the media engine binds transports to (default: "127.0.0.1").
    pub listen_ip: String,

    /// IP advertised to clients in ICE candidates, if different from `listen_ip`.
    pub announced_ip: Option<String>,

    /// Lower bound of the engine's RTC port range (default: 40000).
    pub rtc_min_port: u16,

    /// Upper bound of the engine's RTC port range (default: 49999).
    pub rtc_max_port: u16,

    /// Stop room actors once their last peer leaves (default: true).
    pub reap_empty_rooms: bool,

    /// Per-connection outbound queue capacity (default: 256).
    pub notification_buffer: usize,

    /// Maximum WebSocket message size in bytes (default: 65536).
    pub max_message_size: usize,

    /// Unique identifier for this instance.
    pub rc_id: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        // PORT only applies when no explicit bind address is given
        let bind_address = match (vars.get("RC_BIND_ADDRESS"), vars.get("PORT")) {
            (Some(addr), _) => addr.clone(),
            (None, Some(port)) => {
                let port: u16 = port
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue(format!("PORT={port}")))?;
                format!("0.0.0.0:{port}")
            }
            (None, None) => DEFAULT_BIND_ADDRESS.to_string(),
        };

        let listen_ip = vars
            .get("RC_LISTEN_IP")
            .or_else(|| vars.get("LISTEN_IP"))
            .cloned()
            .unwrap_or_else(|| DEFAULT_LISTEN_IP.to_string());

        let announced_ip = vars
            .get("RC_ANNOUNCED_IP")
            .or_else(|| vars.get("ANNOUNCED_IP"))
            .filter(|ip| !ip.is_empty())
            .cloned();

        let rtc_min_port = parse_var(vars, "RC_RTC_MIN_PORT", DEFAULT_RTC_MIN_PORT)?;
        let rtc_max_port = parse_var(vars, "RC_RTC_MAX_PORT", DEFAULT_RTC_MAX_PORT)?;
        if rtc_min_port > rtc_max_port {
            return Err(ConfigError::InvalidValue(format!(
                "RC_RTC_MIN_PORT ({rtc_min_port}) must not exceed RC_RTC_MAX_PORT ({rtc_max_port})"
            )));
        }

        let reap_empty_rooms = parse_var(vars, "RC_REAP_EMPTY_ROOMS", true)?;

        let notification_buffer =
            parse_var(vars, "RC_NOTIFICATION_BUFFER", DEFAULT_NOTIFICATION_BUFFER)?;
        if notification_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "RC_NOTIFICATION_BUFFER must be greater than 0".to_string(),
            ));
        }

        let max_message_size = parse_var(vars, "RC_MAX_MESSAGE_SIZE", DEFAULT_MAX_MESSAGE_SIZE)?;

        let rc_id = vars.get("RC_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_RC_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            bind_address,
            listen_ip,
            announced_ip,
            rtc_min_port,
            rtc_max_port,
            reap_empty_rooms,
            notification_buffer,
            max_message_size,
            rc_id,
        })
    }
}

fn parse_var<T: FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}={raw}"))),
        None => Ok(default),
    }
}
