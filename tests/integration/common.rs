//! Shared helpers for integration tests.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use reactobus::transport::{FrameSource, Frames};
use reactobus::{Config, Context, Envelope, Pipeline, Registry};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// A running pipeline and the handle to stop it.
pub struct Running {
    pub cancel: CancellationToken,
    pub handle: JoinHandle<()>,
}

impl Running {
    pub async fn stop(self) {
        self.cancel.cancel();
        tokio::time::timeout(TIMEOUT, self.handle)
            .await
            .expect("pipeline did not stop")
            .expect("pipeline task panicked");
    }
}

/// Build the pipeline described by `yaml` and start it.
pub async fn start(yaml: &str, ctx: &Context) -> Running {
    let config = Config::from_yaml(yaml).expect("invalid test configuration");
    let pipeline = Pipeline::build(&config, ctx, &Registry::default())
        .await
        .expect("failed to build pipeline");
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(pipeline.run(cancel.clone()));
    Running { cancel, handle }
}

pub fn envelope(topic: &str, username: &str, payload: &str) -> Frames {
    Envelope::new(
        topic,
        uuid::Uuid::new_v4().to_string(),
        "1970-01-01T00:00:00.000000",
        username,
        Bytes::copy_from_slice(payload.as_bytes()),
    )
    .encode()
}

pub async fn recv(source: &mut Box<dyn FrameSource>) -> Frames {
    tokio::time::timeout(TIMEOUT, source.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("transport closed")
}

/// Poll `check` until it returns true.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(TIMEOUT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition never became true");
}
