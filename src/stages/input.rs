//! Input stage: admits well-formed envelopes into the core.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::Stage;
use crate::envelope::ENVELOPE_FRAMES;
use crate::transport::{FrameSink, FrameSource, TransportError};

/// Forwards every 5-frame message from an external endpoint to core inbound.
pub struct Input {
    name: String,
    source: Box<dyn FrameSource>,
    core: Box<dyn FrameSink>,
}

impl Input {
    pub fn new(name: impl Into<String>, source: Box<dyn FrameSource>, core: Box<dyn FrameSink>) -> Self {
        Self {
            name: name.into(),
            source,
            core,
        }
    }
}

#[async_trait]
impl Stage for Input {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(self: Box<Self>, cancel: CancellationToken) {
        let Input {
            name,
            mut source,
            core,
        } = *self;

        info!(input = %name, "Input started");
        loop {
            let frames = tokio::select! {
                _ = cancel.cancelled() => break,
                frames = source.recv() => match frames {
                    Ok(frames) => frames,
                    Err(TransportError::Closed) => break,
                    Err(e) => {
                        error!(input = %name, error = %e, "Receive failed");
                        break;
                    }
                },
            };

            if frames.len() != ENVELOPE_FRAMES {
                error!(input = %name, frames = frames.len(), "Dropping invalid message");
                debug!(input = %name, message = ?frames, "Dropped");
                continue;
            }
            debug!(input = %name, topic = %String::from_utf8_lossy(&frames[0]), "Received");

            let sent = tokio::select! {
                _ = cancel.cancelled() => break,
                sent = core.send(frames) => sent,
            };
            if let Err(e) = sent {
                error!(input = %name, error = %e, "Unable to forward to core");
                break;
            }
        }
        info!(input = %name, "Input stopped");
    }
}
