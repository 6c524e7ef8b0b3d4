//! Heartbeat schedule of an output stage.
//!
//! The schedule is driven by explicit instants so the output loop owns the
//! clock. Waits are always relative to the last emission, never to the last
//! forwarded message, so traffic cannot starve the heartbeat.

use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;

use crate::config::deserialize_seconds;
use crate::envelope::heartbeat_frames;
use crate::transport::Frames;

/// Shortest wait between two schedule checks.
pub const MIN_WAIT: Duration = Duration::from_millis(1);

/// The `heartbeat` option of an output.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HeartbeatConfig {
    pub topic: String,
    #[serde(rename = "timeout", alias = "interval", deserialize_with = "deserialize_seconds")]
    pub interval: Duration,
}

#[derive(Debug, Clone)]
pub struct Heartbeat {
    topic: String,
    interval: Duration,
    last_emitted: Instant,
}

impl Heartbeat {
    pub fn new(config: &HeartbeatConfig, now: Instant) -> Self {
        Self {
            topic: config.topic.clone(),
            interval: config.interval,
            last_emitted: now,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// How long to wait for traffic before the next heartbeat is due.
    pub fn wait_timeout(&self, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(self.last_emitted);
        self.interval.saturating_sub(elapsed).max(MIN_WAIT)
    }

    /// Emit a heartbeat when one is due.
    pub fn tick(&mut self, now: Instant) -> Option<Frames> {
        let elapsed = now.saturating_duration_since(self.last_emitted);
        if elapsed < self.interval {
            return None;
        }
        self.last_emitted = now;
        Some(heartbeat_frames(&self.topic, elapsed))
    }
}
