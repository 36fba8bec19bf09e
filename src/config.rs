//! Configuration for the OpalKV client
//!
//! Centralized configuration with sensible defaults.

use std::time::Duration;

/// Main configuration for a client connection
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// Server host (IP or domain)
    pub host: String,

    /// Server port
    pub port: u16,

    // -------------------------------------------------------------------------
    // Handshake Configuration
    // -------------------------------------------------------------------------
    /// How long to wait for the handshake acknowledgement before tearing
    /// the socket down
    pub handshake_timeout: Duration,

    // -------------------------------------------------------------------------
    // Reconnect Configuration
    // -------------------------------------------------------------------------
    /// Delay before the first reconnect attempt; doubles on every failed
    /// attempt up to `max_reconnect_delay`
    pub reconnect_delay: Duration,

    /// Ceiling for the doubled reconnect delay
    pub max_reconnect_delay: Duration,

    /// Reconnect attempts before giving up permanently
    pub max_reconnect_attempts: u32,

    // -------------------------------------------------------------------------
    // Watch Configuration
    // -------------------------------------------------------------------------
    /// Re-issue the subscribe command after a watch session reconnects.
    /// When off, a reconnected session delivers nothing until the caller
    /// subscribes again.
    pub resubscribe_on_reconnect: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7379,
            handshake_timeout: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            max_reconnect_attempts: 5,
            resubscribe_on_reconnect: true,
        }
    }
}

impl Config {
    /// Create a config for the given server address with default timeouts
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// `host:port` string for connect and logging
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the server host
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the server port
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the handshake timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Set the initial reconnect delay
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_delay = delay;
        self
    }

    /// Set the reconnect delay ceiling
    pub fn max_reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.max_reconnect_delay = delay;
        self
    }

    /// Set the maximum number of reconnect attempts
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.max_reconnect_attempts = attempts;
        self
    }

    /// Enable or disable automatic resubscription after a watch reconnect
    pub fn resubscribe_on_reconnect(mut self, enabled: bool) -> Self {
        self.config.resubscribe_on_reconnect = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
