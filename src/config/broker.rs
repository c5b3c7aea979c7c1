//! Broker Configuration
//!
//! Connection settings for the MQTT broker mqti subscribes to.

use std::time::Duration;

use serde::Deserialize;

use super::ConfigError;

/// Broker connection protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Plain MQTT over TCP
    #[serde(alias = "mqtt")]
    Tcp,
    /// MQTT over TLS
    #[serde(alias = "mqtts", alias = "tls")]
    Ssl,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Ssl => write!(f, "ssl"),
        }
    }
}

impl Protocol {
    /// Get default port for this protocol
    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Tcp => 1883,
            Protocol::Ssl => 8883,
        }
    }

    /// Check if this protocol uses TLS
    pub fn uses_tls(&self) -> bool {
        matches!(self, Protocol::Ssl)
    }
}

/// Configuration for the broker connection
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Broker host name or address
    #[serde(default = "default_host")]
    pub host: String,

    /// Broker port (defaults to the protocol's well-known port)
    #[serde(default)]
    pub port: Option<u16>,

    /// Explicit protocol; derived from the TLS settings when unset
    #[serde(default)]
    pub protocol: Option<Protocol>,

    /// Client ID presented to the broker (required)
    #[serde(default)]
    pub client_id: String,

    /// Username for authentication
    #[serde(default)]
    pub username: String,

    /// Password for authentication
    #[serde(default)]
    pub password: String,

    /// Discard broker-side session state on connect
    #[serde(default)]
    pub clean_session: bool,

    /// Client certificate chain (PEM)
    #[serde(default)]
    pub tls_cert: Option<String>,

    /// Client private key (PEM)
    #[serde(default)]
    pub tls_private_key: Option<String>,

    /// CA bundle used to verify the broker (PEM). Public web roots when unset.
    #[serde(default)]
    pub tls_ca: Option<String>,

    /// Keep-alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive: u16,

    /// Initial delay before retrying a lost connection, in seconds
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval: u64,

    /// Maximum reconnect delay in seconds (for exponential backoff)
    #[serde(default = "default_max_reconnect_interval")]
    pub max_reconnect_interval: u64,

    /// Capacity of the client request queue (subscribe/disconnect requests)
    #[serde(default = "default_request_channel_capacity")]
    pub request_channel_capacity: usize,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_keep_alive() -> u16 {
    60
}

fn default_reconnect_interval() -> u64 {
    1
}

fn default_max_reconnect_interval() -> u64 {
    60
}

fn default_request_channel_capacity() -> usize {
    64
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
            protocol: None,
            client_id: String::new(),
            username: String::new(),
            password: String::new(),
            clean_session: false,
            tls_cert: None,
            tls_private_key: None,
            tls_ca: None,
            keep_alive: default_keep_alive(),
            reconnect_interval: default_reconnect_interval(),
            max_reconnect_interval: default_max_reconnect_interval(),
            request_channel_capacity: default_request_channel_capacity(),
        }
    }
}

impl BrokerConfig {
    /// Both halves of the client certificate pair are configured
    pub fn tls_defined(&self) -> bool {
        self.tls_cert.is_some() && self.tls_private_key.is_some()
    }

    /// Effective protocol: explicit setting, else `ssl` when a certificate pair is set
    pub fn protocol(&self) -> Protocol {
        match self.protocol {
            Some(protocol) => protocol,
            None if self.tls_defined() => Protocol::Ssl,
            None => Protocol::Tcp,
        }
    }

    /// Effective port
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.protocol().default_port())
    }

    /// Broker URI, used for logging
    pub fn broker_uri(&self) -> String {
        format!("{}://{}:{}", self.protocol(), self.host, self.port())
    }

    /// Credentials to send, if a username is configured
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.username.is_empty() {
            None
        } else {
            Some((self.username.as_str(), self.password.as_str()))
        }
    }

    /// Get keep-alive as Duration
    pub fn keep_alive_duration(&self) -> Duration {
        Duration::from_secs(self.keep_alive as u64)
    }

    /// Get reconnect interval as Duration
    pub fn reconnect_interval_duration(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval)
    }

    /// Get max reconnect interval as Duration
    pub fn max_reconnect_interval_duration(&self) -> Duration {
        Duration::from_secs(self.max_reconnect_interval)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Validation("mqtt.host is required".to_string()));
        }
        if self.client_id.is_empty() {
            return Err(ConfigError::Validation(
                "mqtt.client_id is required".to_string(),
            ));
        }
        if self.client_id.starts_with(char::is_whitespace) {
            return Err(ConfigError::Validation(
                "mqtt.client_id must not start with whitespace".to_string(),
            ));
        }
        if self.tls_cert.is_some() != self.tls_private_key.is_some() {
            return Err(ConfigError::Validation(
                "mqtt.tls_cert and mqtt.tls_private_key must be set together".to_string(),
            ));
        }
        // 0 disables keep-alive; anything else below 5s is rejected by the client.
        if self.keep_alive != 0 && self.keep_alive < 5 {
            return Err(ConfigError::Validation(
                "mqtt.keep_alive must be 0 or at least 5 seconds".to_string(),
            ));
        }
        if self.reconnect_interval == 0 || self.max_reconnect_interval < self.reconnect_interval {
            return Err(ConfigError::Validation(
                "mqtt.reconnect_interval must be > 0 and <= mqtt.max_reconnect_interval"
                    .to_string(),
            ));
        }
        if self.request_channel_capacity == 0 {
            return Err(ConfigError::Validation(
                "mqtt.request_channel_capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
