//! TCP endpoints using [`MultipartCodec`] framing.
//!
//! Bound endpoints run an accept loop in the background. Connected endpoints
//! dial lazily and redial whenever the peer goes away, so either side may
//! start or restart first. Every loop and per-connection task stops when the
//! endpoint handle is dropped.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use backon::Retryable;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use super::{ChannelSource, FrameSink, FrameSource, Frames, MultipartCodec, Result, TransportError};
use crate::utils::retry::connection_backoff;

type Subscribers = Arc<Mutex<Vec<flume::Sender<Frames>>>>;

fn lock(subscribers: &Subscribers) -> MutexGuard<'_, Vec<flume::Sender<Frames>>> {
    subscribers
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn listen(addr: &str) -> Result<TcpListener> {
    TcpListener::bind(addr).await.map_err(|e| {
        if e.kind() == io::ErrorKind::AddrInUse {
            TransportError::AlreadyBound(format!("tcp://{}", addr))
        } else {
            TransportError::Io(e)
        }
    })
}

/// Connect to a peer, redialing until it accepts.
async fn dial(addr: &str) -> TcpStream {
    loop {
        let connected = (|| TcpStream::connect(addr))
            .retry(connection_backoff())
            .notify(|err: &io::Error, dur: Duration| {
                debug!(address = %addr, error = %err, delay = ?dur, "Connection failed, retrying");
            })
            .await;
        match connected {
            Ok(stream) => {
                debug!(address = %addr, "Connected");
                return stream;
            }
            Err(e) => warn!(address = %addr, error = %e, "Peer unreachable, still dialing"),
        }
    }
}

// ============================================================================
// Push / pull
// ============================================================================

pub(super) async fn bind_pull(addr: &str, capacity: usize) -> Result<Box<dyn FrameSource>> {
    let listener = listen(addr).await?;
    let (sender, receiver) = flume::bounded(capacity);
    let cancel = CancellationToken::new();

    debug!(address = %addr, "Bound tcp pull endpoint");
    tokio::spawn(accept_pullers(listener, sender, cancel.clone()));
    Ok(Box::new(ChannelSource::with_guard(
        receiver,
        cancel.drop_guard(),
    )))
}

async fn accept_pullers(
    listener: TcpListener,
    sender: flume::Sender<Frames>,
    cancel: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                debug!(peer = %peer, "Accepted pusher");
                tokio::spawn(read_frames(stream, sender.clone(), cancel.child_token()));
            }
            Err(e) => warn!(error = %e, "Failed to accept connection"),
        }
    }
}

/// Forward every decoded message of `stream` into `sender`.
async fn read_frames(stream: TcpStream, sender: flume::Sender<Frames>, cancel: CancellationToken) {
    let mut reader = FramedRead::new(stream, MultipartCodec::new());
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = reader.next() => next,
        };
        match next {
            Some(Ok(frames)) => {
                if sender.send_async(frames).await.is_err() {
                    break;
                }
            }
            Some(Err(e)) => {
                warn!(error = %e, "Dropping connection with invalid framing");
                break;
            }
            None => break,
        }
    }
}

pub(super) async fn connect_push(addr: &str) -> Result<Box<dyn FrameSink>> {
    debug!(address = %addr, "Created tcp push endpoint");
    Ok(Box::new(StreamSink {
        addr: addr.to_string(),
        writer: AsyncMutex::new(None),
    }))
}

/// Push connection, dialed on first send and redialed after a write error.
struct StreamSink {
    addr: String,
    writer: AsyncMutex<Option<FramedWrite<TcpStream, MultipartCodec>>>,
}

#[async_trait]
impl FrameSink for StreamSink {
    /// Waits until the message is handed to a live connection.
    async fn send(&self, frames: Frames) -> Result<()> {
        let mut writer = self.writer.lock().await;
        loop {
            // Taken out while in use, so a send cancelled mid-write drops
            // the half-written connection.
            let mut connection = match writer.take() {
                Some(connection) => connection,
                None => FramedWrite::new(dial(&self.addr).await, MultipartCodec::new()),
            };
            match connection.send(frames.clone()).await {
                Ok(()) => {
                    *writer = Some(connection);
                    return Ok(());
                }
                // Rejected by the codec before anything was written.
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    *writer = Some(connection);
                    return Err(e.into());
                }
                Err(e) => warn!(address = %self.addr, error = %e, "Connection lost, reconnecting"),
            }
        }
    }
}

// ============================================================================
// Publish / subscribe
// ============================================================================

pub(super) async fn bind_pub(addr: &str) -> Result<Box<dyn FrameSink>> {
    let listener = listen(addr).await?;
    let subscribers = Subscribers::default();
    let cancel = CancellationToken::new();

    debug!(address = %addr, "Bound tcp publish endpoint");
    tokio::spawn(accept_subscribers(
        listener,
        Arc::clone(&subscribers),
        cancel.clone(),
    ));
    Ok(Box::new(PubSink {
        subscribers,
        _guard: cancel.drop_guard(),
    }))
}

async fn accept_subscribers(
    listener: TcpListener,
    subscribers: Subscribers,
    cancel: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                debug!(peer = %peer, "Accepted subscriber");
                let (sender, receiver) = flume::unbounded();
                lock(&subscribers).push(sender);
                tokio::spawn(write_frames(stream, receiver, cancel.child_token()));
            }
            Err(e) => warn!(error = %e, "Failed to accept connection"),
        }
    }
}

/// Drain one subscriber queue onto its connection.
async fn write_frames(stream: TcpStream, receiver: flume::Receiver<Frames>, cancel: CancellationToken) {
    let mut writer = FramedWrite::new(stream, MultipartCodec::new());
    loop {
        let frames = tokio::select! {
            _ = cancel.cancelled() => break,
            frames = receiver.recv_async() => match frames {
                Ok(frames) => frames,
                Err(_) => break,
            },
        };
        if let Err(e) = writer.send(frames).await {
            debug!(error = %e, "Subscriber disconnected");
            break;
        }
    }
}

struct PubSink {
    subscribers: Subscribers,
    _guard: DropGuard,
}

#[async_trait]
impl FrameSink for PubSink {
    async fn send(&self, frames: Frames) -> Result<()> {
        lock(&self.subscribers).retain(|subscriber| subscriber.send(frames.clone()).is_ok());
        Ok(())
    }
}

pub(super) async fn connect_sub(addr: &str) -> Result<Box<dyn FrameSource>> {
    let (sender, receiver) = flume::unbounded();
    let cancel = CancellationToken::new();

    debug!(address = %addr, "Created tcp subscriber");
    tokio::spawn(subscribe(addr.to_string(), sender, cancel.clone()));
    Ok(Box::new(ChannelSource::with_guard(
        receiver,
        cancel.drop_guard(),
    )))
}

/// Keep a subscription to `addr` alive across publisher restarts.
async fn subscribe(addr: String, sender: flume::Sender<Frames>, cancel: CancellationToken) {
    loop {
        let stream = tokio::select! {
            _ = cancel.cancelled() => break,
            stream = dial(&addr) => stream,
        };
        read_frames(stream, sender.clone(), cancel.clone()).await;
        if cancel.is_cancelled() || sender.is_disconnected() {
            break;
        }
        warn!(address = %addr, "Publisher disconnected, reconnecting");
    }
}
