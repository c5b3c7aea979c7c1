//! Inbound messages

use std::borrow::Cow;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::{json, Map, Value};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::registry::Mapping;

/// A message received on a subscription, paired with the mapping that owns
/// that subscription. The pairing is fixed when the message is created.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    topic: String,
    payload: Bytes,
    mapping: Arc<Mapping>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: Bytes, mapping: Arc<Mapping>) -> Self {
        Self {
            topic: topic.into(),
            payload,
            mapping,
        }
    }

    /// Topic the message was published on
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn mapping(&self) -> &Arc<Mapping> {
        &self.mapping
    }

    /// Payload decoded as UTF-8, with invalid sequences replaced
    pub fn payload_as_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Payload parsed as a JSON object
    pub fn payload_as_json(&self) -> Result<Map<String, Value>, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// One-line JSON record for downstream consumers
    pub fn to_record(&self) -> Value {
        json!({
            "topic": self.topic,
            "mapping": self.mapping.index(),
            "payload": self.payload_as_str(),
        })
    }
}

/// Write every message from `rx` to `writer` as one JSON line, flushing after
/// each. Returns the number of lines written once all senders are gone, or the
/// first write error.
pub async fn write_records<W>(
    mut rx: mpsc::Receiver<InboundMessage>,
    mut writer: W,
) -> std::io::Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    while let Some(message) = rx.recv().await {
        let mut line = message.to_record().to_string();
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        written += 1;
    }
    Ok(written)
}
