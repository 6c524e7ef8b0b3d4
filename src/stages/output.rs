//! Output stage: forwards the core stream to an external endpoint.
//!
//! - Filters: a message is forwarded only when every filter matches
//! - Heartbeat: optional `[topic, elapsed]` message emitted on schedule,
//!   interleaved with forwarding

use std::borrow::Cow;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::heartbeat::{Heartbeat, HeartbeatConfig};
use super::Stage;
use crate::envelope::Envelope;
use crate::filter::FilterChain;
use crate::transport::{FrameSink, FrameSource, Frames, TransportError};

pub struct Output {
    name: String,
    source: Box<dyn FrameSource>,
    sink: Box<dyn FrameSink>,
    filters: FilterChain,
    heartbeat: Option<HeartbeatConfig>,
}

impl Output {
    /// `source` is a subscription to core outbound.
    pub fn new(
        name: impl Into<String>,
        source: Box<dyn FrameSource>,
        sink: Box<dyn FrameSink>,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            sink,
            filters: FilterChain::default(),
            heartbeat: None,
        }
    }

    pub fn with_filters(mut self, filters: FilterChain) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    /// True when the message must not be forwarded.
    fn suppress(&self, frames: &Frames) -> bool {
        if self.filters.is_empty() {
            return false;
        }
        match Envelope::decode(frames) {
            Ok(envelope) => self.filters.suppress(&envelope),
            Err(e) => {
                warn!(output = %self.name, error = %e, "Suppressing undecodable message");
                true
            }
        }
    }

    async fn forward(&self, frames: Frames) {
        if self.suppress(&frames) {
            return;
        }
        debug!(output = %self.name, topic = %topic_of(&frames), "Forwarding");
        if let Err(e) = self.sink.send(frames).await {
            error!(output = %self.name, error = %e, "Unable to forward message");
        }
    }

    async fn emit(&self, frames: Frames) {
        debug!(output = %self.name, "Sending heartbeat");
        if let Err(e) = self.sink.send(frames).await {
            error!(output = %self.name, error = %e, "Unable to send heartbeat");
        }
    }

    async fn recv(&mut self) -> Option<Frames> {
        match self.source.recv().await {
            Ok(frames) => Some(frames),
            Err(TransportError::Closed) => None,
            Err(e) => {
                error!(output = %self.name, error = %e, "Receive failed");
                None
            }
        }
    }

    async fn run_plain(mut self, cancel: CancellationToken) {
        loop {
            let frames = tokio::select! {
                _ = cancel.cancelled() => break,
                frames = self.recv() => match frames {
                    Some(frames) => frames,
                    None => break,
                },
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.forward(frames) => {}
            }
        }
    }

    async fn run_with_heartbeat(mut self, config: HeartbeatConfig, cancel: CancellationToken) {
        let mut heartbeat = Heartbeat::new(&config, Instant::now());
        loop {
            let wait = heartbeat.wait_timeout(Instant::now());
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = tokio::time::timeout(wait, self.recv()) => received,
            };

            // Heartbeats go out even when traffic keeps arriving.
            if let Some(beat) = heartbeat.tick(Instant::now()) {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = self.emit(beat) => {}
                }
            }

            match received {
                Ok(Some(frames)) => tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = self.forward(frames) => {}
                },
                Ok(None) => break,
                Err(_) => {}
            }
        }
    }
}

fn topic_of(frames: &[Bytes]) -> Cow<'_, str> {
    frames
        .first()
        .map(|topic| String::from_utf8_lossy(topic))
        .unwrap_or_default()
}

#[async_trait]
impl Stage for Output {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(self: Box<Self>, cancel: CancellationToken) {
        let mut output = *self;
        let name = output.name.clone();
        info!(
            output = %name,
            filters = output.filters.len(),
            heartbeat = output.heartbeat.is_some(),
            "Output started"
        );
        match output.heartbeat.take() {
            Some(config) => output.run_with_heartbeat(config, cancel).await,
            None => output.run_plain(cancel).await,
        }
        info!(output = %name, "Output stopped");
    }
}
