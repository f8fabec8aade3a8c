//! Configuration management for Speed.
//!
//! This module handles loading, saving, and managing Speed configuration.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/speed/config.toml` |
//! | macOS | `~/Library/Application Support/Speed/config.toml` |
//! | Windows | `%APPDATA%\Speed\config.toml` |
//!
//! ## Example
//!
//! ```rust,ignore
//! use speed_core::config::Config;
//!
//! let config = Config::load()?;
//! println!("Relay: {}:{}", config.relay.host, config.relay.port);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::{Host, Url};

use crate::error::{Error, Result};

/// Main configuration struct for Speed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which relay peers register with
    pub relay: RelayConfig,
    /// Transfer settings
    pub transfer: TransferSettings,
    /// Settings for running a relay
    pub server: ServerConfig,
}

/// Signaling relay the peer connects to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Relay host name
    pub host: String,
    /// Relay port
    pub port: u16,
    /// Path the relay is mounted at
    pub path: String,
    /// Use TLS (`wss://`)
    pub secure: bool,
    /// API key expected by the relay
    pub key: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: crate::DEFAULT_RELAY_PORT,
            path: crate::DEFAULT_RELAY_PATH.to_string(),
            secure: false,
            key: crate::DEFAULT_RELAY_KEY.to_string(),
        }
    }
}

impl RelayConfig {
    /// Parse a relay URL such as `wss://relay.example.com/myapp`.
    ///
    /// Missing ports default to 443 for `wss`/`https` and 80 otherwise.
    /// User info and query strings are ignored. The key is left at its
    /// default.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL does not parse, the scheme is unknown or
    /// the host is missing.
    pub fn from_url(input: &str) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidConfig {
            key: "relay".to_string(),
            reason,
        };

        let url = Url::parse(input.trim())
            .map_err(|e| invalid(format!("invalid relay URL '{input}': {e}")))?;

        let secure = match url.scheme() {
            "wss" | "https" => true,
            "ws" | "http" => false,
            other => return Err(invalid(format!("unsupported relay scheme '{other}'"))),
        };

        let host = match url.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => return Err(invalid("missing host".to_string())),
        };

        let port = url
            .port_or_known_default()
            .unwrap_or(if secure { 443 } else { 80 });

        Ok(Self {
            host,
            port,
            path: url.path().trim_end_matches('/').to_string(),
            secure,
            ..Self::default()
        })
    }
}

/// Transfer configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    /// Chunk size for transfers
    pub chunk_size: usize,
    /// Delay between chunk sends
    #[serde(with = "humantime_serde")]
    pub pacing: Duration,
    /// How long to wait for the peer to answer an offer
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,
    /// Default output directory for received files
    pub output_dir: Option<PathBuf>,
    /// Port to accept data channels on (0 = ephemeral)
    pub listen_port: u16,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            pacing: crate::DEFAULT_CHUNK_PACING,
            handshake_timeout: Duration::from_secs(30),
            output_dir: None,
            listen_port: 0,
        }
    }
}

/// Settings for the signaling relay server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen port (`PORT` overrides at runtime)
    pub port: u16,
    /// Mount path
    pub path: String,
    /// API key clients must present
    pub key: String,
    /// How long queued messages wait for an offline peer
    #[serde(with = "humantime_serde")]
    pub expire_timeout: Duration,
    /// Drop clients silent for longer than this
    #[serde(with = "humantime_serde")]
    pub alive_timeout: Duration,
    /// Maximum number of connected clients
    pub concurrent_limit: usize,
    /// Allow listing connected peers
    pub allow_discovery: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: crate::DEFAULT_RELAY_PORT,
            path: crate::DEFAULT_RELAY_PATH.to_string(),
            key: crate::DEFAULT_RELAY_KEY.to_string(),
            expire_timeout: Duration::from_secs(5),
            alive_timeout: Duration::from_secs(60),
            concurrent_limit: 5000,
            allow_discovery: false,
        }
    }
}

impl ServerConfig {
    /// Apply the `PORT` environment variable, if set.
    ///
    /// # Errors
    ///
    /// Returns an error if `PORT` is set but not a valid port number.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(port) = std::env::var("PORT") {
            self.port = port.trim().parse().map_err(|_| Error::InvalidConfig {
                key: "PORT".to_string(),
                reason: format!("'{port}' is not a port number"),
            })?;
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::ConfigError(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    ///
    /// Creates the configuration directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigError(format!("Failed to create config directory: {e}"))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(&path, content)
            .map_err(|e| Error::ConfigError(format!("Failed to write config: {e}")))
    }

    /// Check values that would make a transfer impossible.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` naming the offending key.
    pub fn validate(&self) -> Result<()> {
        if self.transfer.chunk_size == 0
            || self.transfer.chunk_size > crate::protocol::MAX_CHUNK_SIZE
        {
            return Err(Error::InvalidConfig {
                key: "transfer.chunk_size".to_string(),
                reason: format!(
                    "must be between 1 and {} bytes",
                    crate::protocol::MAX_CHUNK_SIZE
                ),
            });
        }
        if !self.server.path.starts_with('/') {
            return Err(Error::InvalidConfig {
                key: "server.path".to_string(),
                reason: "must start with '/'".to_string(),
            });
        }
        if self.server.concurrent_limit == 0 {
            return Err(Error::InvalidConfig {
                key: "server.concurrent_limit".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Get the default configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "speed", "Speed")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the full path to the configuration file.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_duration(&s).ok_or_else(|| serde::de::Error::custom("invalid duration format"))
    }
}

/// Parse a duration string like "5ms", "30s" or "5m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();

        assert_eq!(config.transfer.chunk_size, 64 * 1024);
        assert_eq!(config.transfer.pacing, Duration::from_millis(5));
        assert_eq!(config.server.port, 4002);
        assert_eq!(config.server.path, "/myapp");
        assert_eq!(config.relay.path, "/myapp");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let mut original = Config::default();
        original.relay.host = "relay.example.com".to_string();
        original.relay.secure = true;
        original.transfer.chunk_size = 16 * 1024;
        original.server.allow_discovery = true;

        let content = toml::to_string_pretty(&original).expect("serialize");
        std::fs::write(&config_path, &content).expect("write");

        let loaded_content = std::fs::read_to_string(&config_path).expect("read");
        let loaded: Config = toml::from_str(&loaded_content).expect("parse");

        assert_eq!(loaded.relay.host, "relay.example.com");
        assert!(loaded.relay.secure);
        assert_eq!(loaded.transfer.chunk_size, 16 * 1024);
        assert_eq!(loaded.transfer.pacing, Duration::from_millis(5));
        assert!(loaded.server.allow_discovery);
    }

    #[test]
    fn test_config_deserialization_partial() {
        let partial_toml = r#"
[relay]
host = "10.0.0.5"

[transfer]
pacing = "20ms"
"#;

        let config: Config = toml::from_str(partial_toml).expect("parse partial config");

        assert_eq!(config.relay.host, "10.0.0.5");
        assert_eq!(config.relay.port, 4002);
        assert_eq!(config.transfer.pacing, Duration::from_millis(20));
        assert_eq!(config.server.expire_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_duration_serialization() {
        let toml_str = toml::to_string_pretty(&Config::default()).expect("serialize");
        assert!(toml_str.contains("pacing = \"5ms\""));
        assert!(toml_str.contains("alive_timeout = \"60s\""));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("5ms"), Some(Duration::from_millis(5)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration(&format!("{}m", u64::MAX)), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn test_validate_rejects_chunks_over_64k() {
        let mut config = Config::default();
        config.transfer.chunk_size = 4 * 1024 * 1024;
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig { key, .. }) if key == "transfer.chunk_size"
        ));

        config.transfer.chunk_size = 64 * 1024;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_chunk() {
        let mut config = Config::default();
        config.transfer.chunk_size = 0;
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig { key, .. }) if key == "transfer.chunk_size"
        ));
    }

    #[test]
    fn test_relay_from_url() {
        let relay = RelayConfig::from_url("wss://speed.example.com/myapp").unwrap();
        assert_eq!(relay.host, "speed.example.com");
        assert_eq!(relay.port, 443);
        assert_eq!(relay.path, "/myapp");
        assert!(relay.secure);

        let relay = RelayConfig::from_url("http://127.0.0.1:4002/").unwrap();
        assert_eq!(relay.host, "127.0.0.1");
        assert_eq!(relay.port, 4002);
        assert_eq!(relay.path, "");
        assert!(!relay.secure);

        assert!(RelayConfig::from_url("ftp://x").is_err());
        assert!(RelayConfig::from_url("ws://host:abc/").is_err());
        assert!(RelayConfig::from_url("relay.example.com").is_err());
    }

    #[test]
    fn test_relay_from_url_drops_userinfo_and_query() {
        let relay = RelayConfig::from_url("wss://user:pw@relay.example.com/myapp?x=1#top").unwrap();
        assert_eq!(relay.host, "relay.example.com");
        assert_eq!(relay.port, 443);
        assert_eq!(relay.path, "/myapp");
    }

    #[test]
    fn test_relay_from_url_ipv6() {
        let relay = RelayConfig::from_url("ws://[::1]:4002/myapp").unwrap();
        assert_eq!(relay.host, "::1");
        assert_eq!(relay.port, 4002);
        assert!(!relay.secure);
    }

    #[test]
    fn test_config_path() {
        assert!(Config::config_path().ends_with("config.toml"));
    }
}
