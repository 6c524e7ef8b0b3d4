//! Multi-frame message transport.
//!
//! This module contains:
//! - `FrameSink` / `FrameSource` traits: send and receive multipart messages
//! - `Context`: explicit transport handle, created once and passed by reference
//! - Implementations: in-process channels (`inproc://name`) and TCP (`tcp://host:port`)
//!
//! Topologies:
//! ```text
//!   push ──┐                       ┌──▶ sub
//!   push ──┼──▶ pull     pub ──────┼──▶ sub
//!   push ──┘   (bounded)  (unbounded per subscriber)
//! ```
//! Push/pull applies backpressure on the sender once the pull queue is full.
//! Pub never blocks: every subscriber owns an unbounded queue, and messages
//! published while nobody listens are dropped.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::DropGuard;

pub mod codec;
mod inproc;
mod tcp;

pub use codec::MultipartCodec;

/// One multipart message.
pub type Frames = Vec<Bytes>;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Default capacity of a pull endpoint's receive queue.
pub const DEFAULT_PULL_CAPACITY: usize = 1000;

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Invalid address '{0}', expected inproc://<name> or tcp://<host>:<port>")]
    InvalidAddress(String),

    #[error("Address already bound: {0}")]
    AlreadyBound(String),

    #[error("Address {0} is already used with another messaging pattern")]
    PatternMismatch(String),

    #[error("Endpoint closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sending half of an endpoint.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Send one multipart message.
    async fn send(&self, frames: Frames) -> Result<()>;
}

/// Receiving half of an endpoint.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Wait for the next multipart message.
    ///
    /// Returns [`TransportError::Closed`] once no sender can ever deliver again.
    /// Cancel-safe: dropping the future never loses a message.
    async fn recv(&mut self) -> Result<Frames>;
}

/// Parsed endpoint address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// In-process endpoint, shared through a [`Context`].
    Inproc(String),
    /// TCP endpoint as `host:port`.
    Tcp(String),
}

impl FromStr for Address {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || TransportError::InvalidAddress(s.to_string());
        let (scheme, rest) = s.split_once("://").ok_or_else(invalid)?;
        if rest.is_empty() {
            return Err(invalid());
        }
        match scheme {
            "inproc" => Ok(Address::Inproc(rest.to_string())),
            "tcp" => Ok(Address::Tcp(rest.to_string())),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Inproc(name) => write!(f, "inproc://{}", name),
            Address::Tcp(addr) => write!(f, "tcp://{}", addr),
        }
    }
}

/// Transport context.
///
/// Owns the registry of in-process endpoints. Create one per process and hand
/// a reference to every component that binds or connects.
pub struct Context {
    inproc: inproc::Registry,
    pull_capacity: usize,
}

impl Context {
    /// Create a context with the default pull queue capacity.
    pub fn new() -> Self {
        Self::with_pull_capacity(DEFAULT_PULL_CAPACITY)
    }

    /// Create a context with a custom pull queue capacity.
    pub fn with_pull_capacity(pull_capacity: usize) -> Self {
        Self {
            inproc: inproc::Registry::default(),
            pull_capacity: pull_capacity.max(1),
        }
    }

    /// Bind a pull endpoint (many pushers, one puller).
    pub async fn bind_pull(&self, address: &str) -> Result<Box<dyn FrameSource>> {
        match address.parse()? {
            Address::Inproc(name) => self.inproc.bind_pull(&name, self.pull_capacity),
            Address::Tcp(addr) => tcp::bind_pull(&addr, self.pull_capacity).await,
        }
    }

    /// Connect a push endpoint to a pull endpoint.
    pub async fn connect_push(&self, address: &str) -> Result<Box<dyn FrameSink>> {
        match address.parse()? {
            Address::Inproc(name) => self.inproc.connect_push(&name, self.pull_capacity),
            Address::Tcp(addr) => tcp::connect_push(&addr).await,
        }
    }

    /// Bind a publish endpoint (fan-out to every subscriber).
    pub async fn bind_pub(&self, address: &str) -> Result<Box<dyn FrameSink>> {
        match address.parse()? {
            Address::Inproc(name) => self.inproc.bind_pub(&name),
            Address::Tcp(addr) => tcp::bind_pub(&addr).await,
        }
    }

    /// Connect a subscriber receiving every published message.
    pub async fn connect_sub(&self, address: &str) -> Result<Box<dyn FrameSource>> {
        match address.parse()? {
            Address::Inproc(name) => self.inproc.connect_sub(&name),
            Address::Tcp(addr) => tcp::connect_sub(&addr).await,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

/// Source backed by a channel, optionally keeping background tasks alive.
struct ChannelSource {
    receiver: flume::Receiver<Frames>,
    /// Cancels the feeding tasks when the source is dropped.
    _guard: Option<DropGuard>,
}

impl ChannelSource {
    fn new(receiver: flume::Receiver<Frames>) -> Self {
        Self {
            receiver,
            _guard: None,
        }
    }

    fn with_guard(receiver: flume::Receiver<Frames>, guard: DropGuard) -> Self {
        Self {
            receiver,
            _guard: Some(guard),
        }
    }
}

#[async_trait]
impl FrameSource for ChannelSource {
    async fn recv(&mut self) -> Result<Frames> {
        self.receiver
            .recv_async()
            .await
            .map_err(|_| TransportError::Closed)
    }
}

#[cfg(test)]
mod tests;
