//! mqti - MQTT topic bridge with payload filtering
//!
//! Connects to an MQTT broker, subscribes to the configured topic mappings and
//! forwards every message that passes its mapping's filter (field equality or
//! a Lua predicate) to a bounded outbound channel.

pub mod bridge;
pub mod config;
pub mod filter;
pub mod message;
pub mod registry;
pub mod topic;

pub use bridge::{BridgeError, ConnectionManager, ConnectionStatus, Dispatcher};
pub use config::Config;
pub use filter::{Decision, Filter, FilterError};
pub use message::InboundMessage;
pub use registry::{Mapping, MappingRegistry};
