//! MQTT Bridge Module
//!
//! Connects to one external broker, subscribes every configured mapping and
//! forwards the messages its filter keeps to the outbound channel.
//!
//! # Example Configuration
//!
//! ```toml
//! [mqtt]
//! host = "broker.example.com"
//! protocol = "ssl"
//! client_id = "mqti-edge-01"
//!
//! [[mapping]]
//! topic = "sensors/+/alarm"
//! filter = [{ severity = "high" }]
//!
//! [[mapping]]
//! topic = "events/#"
//! lua_file = "filters/events.lua"
//! ```

mod connection;
mod dispatcher;
pub mod tls;


use std::fmt;

pub use connection::{
    Backoff, ConnectionManager, Subscriber, DEFAULT_MAX_CONCURRENT_HANDLERS, SUBSCRIPTION_QOS,
};
pub use dispatcher::{DispatchError, Dispatcher, MappingHandler};
pub use tls::TlsError;

/// Errors that end the bridge
#[derive(Debug)]
pub enum BridgeError {
    /// The first connection attempt failed
    Connect(String),
    /// TLS material could not be loaded
    Tls(TlsError),
    /// The client rejected a request
    Client(String),
    /// A handler hit an unrecoverable fault
    Fatal(String),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Connect(msg) => write!(f, "Failed to connect to broker {}", msg),
            BridgeError::Tls(e) => write!(f, "TLS setup failed: {}", e),
            BridgeError::Client(msg) => write!(f, "Client error: {}", msg),
            BridgeError::Fatal(msg) => write!(f, "Fatal error in {}", msg),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<TlsError> for BridgeError {
    fn from(e: TlsError) -> Self {
        BridgeError::Tls(e)
    }
}

/// Status of the broker connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// Not connected and not trying
    #[default]
    Disconnected,
    /// Connection attempt in progress
    Connecting,
    /// Connected and subscribed
    Connected,
    /// Connection lost, waiting before the next attempt
    Backoff,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Backoff => "backoff",
        };
        f.write_str(s)
    }
}
