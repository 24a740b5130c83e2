//! Configuration inputs for call media sessions

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::error::{Error, Result};

/// Default lowest local port handed out for RTP
pub const DEFAULT_MIN_PORT: u16 = 5000;
/// Default highest local port handed out for RTP/RTCP
pub const DEFAULT_MAX_PORT: u16 = 6000;
/// Default number of bind attempts per media kind
pub const DEFAULT_BIND_RETRIES: u32 = 50;
/// Default jitter buffer length requested from transports (milliseconds)
pub const DEFAULT_RECEIVE_BUFFER_MS: u64 = 100;

/// Media session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaSessionConfig {
    /// Lowest port of the local RTP range
    pub min_port: u16,
    /// Highest port of the local RTP range (inclusive, RTCP may use it)
    pub max_port: u16,
    /// Bind attempts before allocation for a media kind gives up
    pub bind_retries: u32,
    /// Receive buffer length handed to transports
    pub receive_buffer_ms: u64,
    /// Whether calls start with secure communication requested
    pub default_secure: bool,
    /// Local address the RTP sockets bind on
    pub bind_address: IpAddr,
    /// Upper bound for a single public address resolution
    pub resolve_timeout_ms: u64,
    /// Identity store handed to the key exchange engine
    pub identity_store: String,
    /// User name placed in the origin line of local descriptions
    pub origin_username: String,
}

impl Default for MediaSessionConfig {
    fn default() -> Self {
        Self {
            min_port: DEFAULT_MIN_PORT,
            max_port: DEFAULT_MAX_PORT,
            bind_retries: DEFAULT_BIND_RETRIES,
            receive_buffer_ms: DEFAULT_RECEIVE_BUFFER_MS,
            default_secure: false,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            resolve_timeout_ms: 5000,
            identity_store: "media-session.zid".to_string(),
            origin_username: "-".to_string(),
        }
    }
}

impl MediaSessionConfig {
    /// Parse a configuration from TOML; missing keys keep their defaults
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: MediaSessionConfig =
            toml::from_str(input).map_err(|e| Error::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the local port range
    pub fn with_port_range(mut self, min_port: u16, max_port: u16) -> Self {
        self.min_port = min_port;
        self.max_port = max_port;
        self
    }

    /// Set the number of bind attempts
    pub fn with_bind_retries(mut self, retries: u32) -> Self {
        self.bind_retries = retries;
        self
    }

    /// Set the receive buffer length
    pub fn with_receive_buffer_ms(mut self, ms: u64) -> Self {
        self.receive_buffer_ms = ms;
        self
    }

    /// Request secure communication for new calls
    pub fn with_default_secure(mut self, secure: bool) -> Self {
        self.default_secure = secure;
        self
    }

    /// Set the local bind address
    pub fn with_bind_address(mut self, addr: IpAddr) -> Self {
        self.bind_address = addr;
        self
    }

    /// Set the origin user name
    pub fn with_origin_username(mut self, username: impl Into<String>) -> Self {
        self.origin_username = username.into();
        self
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    /// Check the values are usable
    pub fn validate(&self) -> Result<()> {
        if self.min_port == 0 {
            return Err(Error::config("min_port must be non-zero"));
        }
        if self.min_port >= self.max_port {
            return Err(Error::config(format!(
                "port range {}-{} cannot hold an RTP/RTCP pair",
                self.min_port, self.max_port
            )));
        }
        if self.bind_retries == 0 {
            return Err(Error::config("bind_retries must be at least 1"));
        }
        if self.resolve_timeout_ms == 0 {
            return Err(Error::config("resolve_timeout_ms must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MediaSessionConfig::default();
        assert_eq!(config.min_port, 5000);
        assert_eq!(config.max_port, 6000);
        assert_eq!(config.bind_retries, 50);
        assert_eq!(config.receive_buffer_ms, 100);
        assert!(!config.default_secure);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = MediaSessionConfig::from_toml_str(
            r#"
            min_port = 20000
            max_port = 20100
            default_secure = true
            "#,
        )
        .unwrap();
        assert_eq!(config.min_port, 20000);
        assert_eq!(config.max_port, 20100);
        assert!(config.default_secure);
        assert_eq!(config.bind_retries, DEFAULT_BIND_RETRIES);
    }

    #[test]
    fn test_invalid_range_rejected() {
        let err = MediaSessionConfig::from_toml_str("min_port = 7000\nmax_port = 6000").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));

        let config = MediaSessionConfig::default().with_bind_retries(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_toml() {
        assert!(MediaSessionConfig::from_toml_str("min_port = \"low\"").is_err());
    }
}
