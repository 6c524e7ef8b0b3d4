//! Core relay.
//!
//! The single point every message crosses:
//! - binds the inbound pull endpoint that all inputs push to
//! - stamps each envelope with the current UTC time
//! - publishes it on the outbound endpoint every consumer subscribes to
//!
//! Inbound applies backpressure through its bounded queue. Outbound never
//! blocks: each subscriber buffers without limit.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::envelope::{now_timestamp, Envelope, MessageError};
use crate::stages::Stage;
use crate::transport::{Context, FrameSink, FrameSource, Frames, TransportError};

/// The `core` configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub inbound: String,
    pub outbound: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            inbound: "inproc://inbound".to_string(),
            outbound: "inproc://outbound".to_string(),
        }
    }
}

pub struct CoreRelay {
    inbound: Box<dyn FrameSource>,
    outbound: Box<dyn FrameSink>,
}

impl CoreRelay {
    pub fn new(inbound: Box<dyn FrameSource>, outbound: Box<dyn FrameSink>) -> Self {
        Self { inbound, outbound }
    }

    /// Bind both core endpoints.
    pub async fn bind(ctx: &Context, config: &CoreConfig) -> Result<Self, TransportError> {
        debug!(address = %config.inbound, "Binding inbound");
        let inbound = ctx.bind_pull(&config.inbound).await?;
        debug!(address = %config.outbound, "Binding outbound");
        let outbound = ctx.bind_pub(&config.outbound).await?;
        Ok(Self::new(inbound, outbound))
    }

    /// Replace the timestamp of a wire envelope with the current time.
    pub fn stamp(frames: &[Bytes]) -> Result<Frames, MessageError> {
        let envelope = Envelope::decode(frames)?;
        Ok(envelope.with_timestamp(now_timestamp()).encode())
    }

    pub async fn run(self, cancel: CancellationToken) {
        let Self {
            mut inbound,
            outbound,
        } = self;

        info!("Core started");
        loop {
            let frames = tokio::select! {
                _ = cancel.cancelled() => break,
                frames = inbound.recv() => match frames {
                    Ok(frames) => frames,
                    Err(TransportError::Closed) => break,
                    Err(e) => {
                        error!(error = %e, "Core receive failed");
                        break;
                    }
                },
            };

            // Inputs only admit 5-frame messages.
            let stamped = match Self::stamp(&frames) {
                Ok(stamped) => stamped,
                Err(e) => {
                    error!(error = %e, "Dropping malformed message on core inbound");
                    continue;
                }
            };
            debug!(topic = %String::from_utf8_lossy(&stamped[0]), "Relaying");

            if let Err(e) = outbound.send(stamped).await {
                error!(error = %e, "Core publish failed");
            }
        }
        info!("Core stopped");
    }
}

#[async_trait]
impl Stage for CoreRelay {
    fn name(&self) -> &str {
        "core"
    }

    async fn run(self: Box<Self>, cancel: CancellationToken) {
        CoreRelay::run(*self, cancel).await
    }
}
