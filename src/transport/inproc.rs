//! In-process endpoints.
//!
//! Endpoints are created on first use by either side, so connecting before
//! binding is allowed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use super::{ChannelSource, FrameSink, FrameSource, Frames, Result, TransportError};

enum Endpoint {
    Pipeline {
        sender: flume::Sender<Frames>,
        receiver: Option<flume::Receiver<Frames>>,
    },
    Broadcast(Arc<Hub>),
}

/// Subscriber queues of one publish endpoint.
#[derive(Default)]
struct Hub {
    subscribers: Mutex<Vec<flume::Sender<Frames>>>,
    /// Held by the live [`PubSink`], if any.
    bound: AtomicBool,
}

impl Hub {
    fn subscribers(&self) -> MutexGuard<'_, Vec<flume::Sender<Frames>>> {
        // A poisoned list is still a valid list of senders.
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Named in-process endpoints.
#[derive(Default)]
pub(super) struct Registry {
    endpoints: Mutex<HashMap<String, Endpoint>>,
}

impl Registry {
    fn endpoints(&self) -> MutexGuard<'_, HashMap<String, Endpoint>> {
        self.endpoints
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn pipeline<T>(
        &self,
        name: &str,
        capacity: usize,
        f: impl FnOnce(&flume::Sender<Frames>, &mut Option<flume::Receiver<Frames>>) -> Result<T>,
    ) -> Result<T> {
        let mut endpoints = self.endpoints();
        let endpoint = endpoints.entry(name.to_string()).or_insert_with(|| {
            let (sender, receiver) = flume::bounded(capacity);
            Endpoint::Pipeline {
                sender,
                receiver: Some(receiver),
            }
        });
        match endpoint {
            Endpoint::Pipeline { sender, receiver } => f(sender, receiver),
            Endpoint::Broadcast { .. } => {
                Err(TransportError::PatternMismatch(format!("inproc://{}", name)))
            }
        }
    }

    fn broadcast<T>(&self, name: &str, f: impl FnOnce(&Arc<Hub>) -> Result<T>) -> Result<T> {
        let mut endpoints = self.endpoints();
        let endpoint = endpoints
            .entry(name.to_string())
            .or_insert_with(|| Endpoint::Broadcast(Arc::new(Hub::default())));
        match endpoint {
            Endpoint::Broadcast(hub) => f(hub),
            Endpoint::Pipeline { .. } => {
                Err(TransportError::PatternMismatch(format!("inproc://{}", name)))
            }
        }
    }

    pub(super) fn bind_pull(&self, name: &str, capacity: usize) -> Result<Box<dyn FrameSource>> {
        let receiver = self.pipeline(name, capacity, |_, receiver| {
            receiver
                .take()
                .ok_or_else(|| TransportError::AlreadyBound(format!("inproc://{}", name)))
        })?;
        debug!(endpoint = %name, "Bound inproc pull endpoint");
        Ok(Box::new(ChannelSource::new(receiver)))
    }

    pub(super) fn connect_push(&self, name: &str, capacity: usize) -> Result<Box<dyn FrameSink>> {
        let sender = self.pipeline(name, capacity, |sender, _| Ok(sender.clone()))?;
        Ok(Box::new(PushSink { sender }))
    }

    pub(super) fn bind_pub(&self, name: &str) -> Result<Box<dyn FrameSink>> {
        let hub = self.broadcast(name, |hub| {
            if hub.bound.swap(true, Ordering::AcqRel) {
                return Err(TransportError::AlreadyBound(format!("inproc://{}", name)));
            }
            Ok(Arc::clone(hub))
        })?;
        debug!(endpoint = %name, "Bound inproc publish endpoint");
        Ok(Box::new(PubSink { hub }))
    }

    pub(super) fn connect_sub(&self, name: &str) -> Result<Box<dyn FrameSource>> {
        let hub = self.broadcast(name, |hub| Ok(Arc::clone(hub)))?;
        let (sender, receiver) = flume::unbounded();
        hub.subscribers().push(sender);
        Ok(Box::new(ChannelSource::new(receiver)))
    }
}

struct PushSink {
    sender: flume::Sender<Frames>,
}

#[async_trait]
impl FrameSink for PushSink {
    async fn send(&self, frames: Frames) -> Result<()> {
        self.sender
            .send_async(frames)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

struct PubSink {
    hub: Arc<Hub>,
}

#[async_trait]
impl FrameSink for PubSink {
    async fn send(&self, frames: Frames) -> Result<()> {
        // Unbounded queues: never blocks, disconnected subscribers are pruned.
        self.hub
            .subscribers()
            .retain(|subscriber| subscriber.send(frames.clone()).is_ok());
        Ok(())
    }
}

impl Drop for PubSink {
    fn drop(&mut self) {
        // Frees the name for the next bind.
        self.hub.bound.store(false, Ordering::Release);
    }
}
