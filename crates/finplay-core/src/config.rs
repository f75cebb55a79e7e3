//! Server context and session tunables
//!
//! `ServerContext` is supplied by whatever owns authentication; the engine
//! only reads it. `SessionConfig` carries the timing and probe knobs with
//! defaults matching what the server expects from a well-behaved client.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Identity and credentials attached to every request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerContext {
    /// Server base, e.g. `https://media.example.com/jellyfin`
    pub base_url: Url,
    /// Access token issued by the server at login
    pub access_token: String,
    /// Stable identifier of this device
    pub device_id: String,
    /// Human-readable device name
    pub device_name: String,
    /// Client application name
    pub client_name: String,
    /// Client application version
    pub client_version: String,
}

impl ServerContext {
    pub fn new(base_url: Url, access_token: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            base_url,
            access_token: access_token.into(),
            device_id: device_id.into(),
            device_name: "finplay".to_string(),
            client_name: "finplay".to_string(),
            client_version: crate::VERSION.to_string(),
        }
    }

    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    pub fn with_client(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.client_name = name.into();
        self.client_version = version.into();
        self
    }

    /// Reject contexts the engine cannot build URLs from
    pub fn validate(&self) -> Result<()> {
        match self.base_url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(Error::InvalidConfig(format!(
                    "server url scheme must be http or https, got {other}"
                )))
            }
        }
        if self.device_id.is_empty() {
            return Err(Error::InvalidConfig("device id must not be empty".into()));
        }
        Ok(())
    }

    /// Base URL as text without a trailing slash
    pub fn base_str(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    /// Join a server-absolute path such as `/Sessions/Playing` onto the base
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        let path = path.trim_start_matches('/');
        Ok(Url::parse(&format!("{}/{}", self.base_str(), path))?)
    }

    /// `Authorization` header value in the MediaBrowser scheme
    pub fn authorization_header(&self) -> String {
        format!(
            "MediaBrowser Client=\"{}\", Device=\"{}\", DeviceId=\"{}\", Version=\"{}\", Token=\"{}\"",
            self.client_name, self.device_name, self.device_id, self.client_version, self.access_token
        )
    }
}

/// Tunables for one player instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Heartbeat progress interval while playing (milliseconds)
    pub heartbeat_interval_ms: u64,
    /// Run the bitrate probe before negotiating
    pub probe_enabled: bool,
    /// Probe payload size in bytes
    pub probe_size_bytes: u64,
    /// Hard limit on the probe duration (milliseconds)
    pub probe_timeout_ms: u64,
    /// Fraction of measured throughput offered to the server
    pub probe_safety_factor: f64,
    /// Lowest ceiling ever handed to negotiation (bps)
    pub min_bitrate_floor: u64,
    /// Request timeout for negotiation and reports (milliseconds)
    pub request_timeout_ms: u64,
    /// Limit on the local audio channel query (milliseconds)
    pub channel_query_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 60_000,
            probe_enabled: true,
            probe_size_bytes: 1024 * 1024,
            probe_timeout_ms: 5_000,
            probe_safety_factor: 0.8,
            min_bitrate_floor: 1_000_000,
            request_timeout_ms: 10_000,
            channel_query_timeout_ms: 2_000,
        }
    }
}

impl SessionConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn channel_query_timeout(&self) -> Duration {
        Duration::from_millis(self.channel_query_timeout_ms)
    }

    /// Load from a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: SessionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_ms == 0 {
            return Err(Error::InvalidConfig("heartbeat interval must be positive".into()));
        }
        if !(self.probe_safety_factor > 0.0 && self.probe_safety_factor <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "probe safety factor must be in (0, 1], got {}",
                self.probe_safety_factor
            )));
        }
        if self.min_bitrate_floor == 0 {
            return Err(Error::InvalidConfig("bitrate floor must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(base: &str) -> ServerContext {
        ServerContext::new(Url::parse(base).unwrap(), "tok", "dev-1")
    }

    #[test]
    fn session_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(60));
        assert_eq!(config.probe_size_bytes, 1_048_576);
        assert_eq!(config.probe_timeout(), Duration::from_secs(5));
        assert_eq!(config.probe_safety_factor, 0.8);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = SessionConfig::from_json(r#"{"heartbeat_interval_ms": 10000}"#).unwrap();
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(10));
        assert_eq!(config.probe_timeout_ms, 5_000);
    }

    #[test]
    fn rejects_zero_heartbeat_interval() {
        let config = SessionConfig {
            heartbeat_interval_ms: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn rejects_bad_safety_factor() {
        assert!(SessionConfig::from_json(r#"{"probe_safety_factor": 1.5}"#).is_err());
    }

    #[test]
    fn endpoint_keeps_base_path() {
        let ctx = context("https://media.example.com/jellyfin/");
        let url = ctx.endpoint("/Sessions/Playing").unwrap();
        assert_eq!(url.as_str(), "https://media.example.com/jellyfin/Sessions/Playing");
    }

    #[test]
    fn authorization_header_carries_token_and_device() {
        let header = context("http://localhost:8096").authorization_header();
        assert!(header.starts_with("MediaBrowser "));
        assert!(header.contains("DeviceId=\"dev-1\""));
        assert!(header.contains("Token=\"tok\""));
    }

    #[test]
    fn rejects_non_http_scheme() {
        assert!(context("ftp://example.com").validate().is_err());
    }
}
