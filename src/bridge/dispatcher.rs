//! Dispatcher
//!
//! Sits between the broker client and the outbound channel: each inbound
//! publish routed to a mapping becomes an [`InboundMessage`], goes through the
//! mapping's filter, and is either sent downstream or dropped.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::filter::{Decision, FilterError, ScriptError};
use crate::message::InboundMessage;
use crate::registry::Mapping;

use super::BridgeError;

/// Error dispatching one message
#[derive(Debug)]
pub enum DispatchError {
    /// Filter evaluation failed
    Filter(FilterError),
    /// The downstream consumer has gone away
    ChannelClosed,
}

impl DispatchError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, DispatchError::Filter(e) if e.is_fatal())
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Filter(e) => write!(f, "filter failed: {}", e),
            DispatchError::ChannelClosed => write!(f, "outbound channel closed"),
        }
    }
}

impl std::error::Error for DispatchError {}

impl From<FilterError> for DispatchError {
    fn from(e: FilterError) -> Self {
        DispatchError::Filter(e)
    }
}

/// Filters messages and forwards the kept ones to the outbound channel.
///
/// Cheap to clone; every clone feeds the same channel.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    outbound: mpsc::Sender<InboundMessage>,
}

impl Dispatcher {
    pub fn new(outbound: mpsc::Sender<InboundMessage>) -> Self {
        Self { outbound }
    }

    /// Filter `message` and, if kept, wait for room on the outbound channel.
    pub async fn dispatch(&self, message: InboundMessage) -> Result<Decision, DispatchError> {
        let decision = evaluate(&message).await?;

        match decision {
            Decision::Keep => {
                debug!(
                    topic = %message.topic(),
                    mapping = message.mapping().index(),
                    "Match! {}",
                    message.payload_as_str()
                );
                self.outbound
                    .send(message)
                    .await
                    .map_err(|_| DispatchError::ChannelClosed)?;
            }
            Decision::Skip => {
                debug!(
                    topic = %message.topic(),
                    mapping = message.mapping().index(),
                    "No match! {}",
                    message.payload_as_str()
                );
            }
        }

        Ok(decision)
    }

    /// The consumer dropped its receiver
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

/// Script filters run on the blocking pool; the rest inline.
async fn evaluate(message: &InboundMessage) -> Result<Decision, FilterError> {
    let mapping = message.mapping();
    if !mapping.filter().is_blocking() {
        return mapping.evaluate(message.payload());
    }

    let mapping = mapping.clone();
    let payload = message.payload().clone();
    tokio::task::spawn_blocking(move || mapping.evaluate(&payload))
        .await
        .map_err(|e| FilterError::Script(ScriptError::Aborted(e.to_string())))?
}

/// Subscription handler bound to one mapping
#[derive(Debug, Clone)]
pub struct MappingHandler {
    mapping: Arc<Mapping>,
    dispatcher: Dispatcher,
}

impl MappingHandler {
    pub fn new(mapping: Arc<Mapping>, dispatcher: Dispatcher) -> Self {
        Self {
            mapping,
            dispatcher,
        }
    }

    pub fn mapping(&self) -> &Arc<Mapping> {
        &self.mapping
    }

    /// Handle one publish on `topic`.
    ///
    /// Only faults that must end the process are returned; per-message
    /// problems are logged and the message is dropped.
    pub async fn handle(&self, topic: String, payload: Bytes) -> Result<(), BridgeError> {
        let message = InboundMessage::new(topic, payload, self.mapping.clone());

        match self.dispatcher.dispatch(message).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_fatal() => Err(BridgeError::Fatal(format!(
                "mapping #{} ({}): {}",
                self.mapping.index(),
                self.mapping.topic(),
                e
            ))),
            Err(e) => {
                warn!(
                    "Mapping #{} ({}): message dropped: {}",
                    self.mapping.index(),
                    self.mapping.topic(),
                    e
                );
                Ok(())
            }
        }
    }
}
