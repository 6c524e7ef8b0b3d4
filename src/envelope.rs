//! Envelope: the 5-frame message unit flowing through the bus.
//!
//! Wire form (order is significant):
//! ```text
//! [topic, uuid, timestamp, username, payload]
//! ```
//! The payload is a UTF-8 JSON document that the transport never inspects.
//! Consumers needing structured data call [`Envelope::parse_payload`].

use std::time::Duration;

use bytes::Bytes;
use chrono::{NaiveDateTime, Utc};
use serde_json::Value;

use crate::lookup::Variables;
use crate::transport::Frames;

/// Number of frames in a well-formed envelope.
pub const ENVELOPE_FRAMES: usize = 5;

/// Timestamp layout stamped by the core relay (UTC, microsecond precision).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Result type for envelope decoding.
pub type Result<T> = std::result::Result<T, MessageError>;

/// Errors raised while decoding a message.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("Malformed message: expected {expected} frames, got {actual}")]
    Malformed { expected: usize, actual: usize },

    #[error("Malformed message: frame '{field}' is not valid UTF-8")]
    Undecodable { field: &'static str },

    #[error("Invalid payload JSON: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

/// An immutable bus message.
///
/// Fields are private; use [`Envelope::with_timestamp`] to derive a stamped copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    topic: String,
    uuid: String,
    timestamp: String,
    username: String,
    payload: Bytes,
}

impl Envelope {
    /// Build an envelope from its five fields.
    pub fn new(
        topic: impl Into<String>,
        uuid: impl Into<String>,
        timestamp: impl Into<String>,
        username: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            topic: topic.into(),
            uuid: uuid.into(),
            timestamp: timestamp.into(),
            username: username.into(),
            payload: payload.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Copy of this envelope carrying a new timestamp.
    pub fn with_timestamp(&self, timestamp: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            ..self.clone()
        }
    }

    /// Decode an envelope from exactly five frames.
    pub fn decode(frames: &[Bytes]) -> Result<Self> {
        let [topic, uuid, timestamp, username, payload] = frames else {
            return Err(MessageError::Malformed {
                expected: ENVELOPE_FRAMES,
                actual: frames.len(),
            });
        };

        Ok(Self {
            topic: text_frame(topic, "topic")?,
            uuid: text_frame(uuid, "uuid")?,
            timestamp: text_frame(timestamp, "timestamp")?,
            username: text_frame(username, "username")?,
            payload: payload.clone(),
        })
    }

    /// Encode into the 5-frame wire form.
    pub fn encode(&self) -> Frames {
        vec![
            Bytes::copy_from_slice(self.topic.as_bytes()),
            Bytes::copy_from_slice(self.uuid.as_bytes()),
            Bytes::copy_from_slice(self.timestamp.as_bytes()),
            Bytes::copy_from_slice(self.username.as_bytes()),
            self.payload.clone(),
        ]
    }

    /// Parse the payload as JSON.
    pub fn parse_payload(&self) -> Result<Value> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Variables visible to rules and filters.
    ///
    /// The payload is deliberately absent: `data` and `data.<key>` are resolved
    /// against the parsed payload by [`crate::lookup::lookup`].
    pub fn variables(&self) -> Variables {
        Variables::from([
            ("topic".to_string(), self.topic.clone()),
            ("uuid".to_string(), self.uuid.clone()),
            ("datetime".to_string(), self.timestamp.clone()),
            ("username".to_string(), self.username.clone()),
        ])
    }
}

fn text_frame(frame: &Bytes, field: &'static str) -> Result<String> {
    std::str::from_utf8(frame)
        .map(str::to_owned)
        .map_err(|_| MessageError::Undecodable { field })
}

/// Current UTC instant in the relay timestamp layout.
pub fn now_timestamp() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a relay timestamp.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").ok()
}

/// Synthetic 2-frame heartbeat: `[topic, elapsed seconds with 4 decimals]`.
pub fn heartbeat_frames(topic: &str, elapsed: Duration) -> Frames {
    vec![
        Bytes::copy_from_slice(topic.as_bytes()),
        Bytes::from(format!("{:.4}", elapsed.as_secs_f64())),
    ]
}
