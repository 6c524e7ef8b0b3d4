//! Worker pool executing matched rules.
//!
//! Jobs travel in wire form over one shared multi-consumer queue:
//! ```text
//! [matcher index, topic, uuid, datetime, username, data]
//! ```
//! Every worker competes for the next job, so each job runs exactly once.
//! A hanging command only blocks the worker running it.

use std::sync::Arc;

use bytes::Bytes;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::exec::CommandRunner;
use super::matcher::{Matcher, RunOutcome};
use crate::envelope::{Envelope, MessageError};
use crate::transport::Frames;

/// Errors raised while decoding a job.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job has no frames")]
    Empty,

    #[error("Invalid matcher index '{0}'")]
    InvalidIndex(String),

    #[error("Matcher index {index} out of range ({count} matchers)")]
    IndexOutOfRange { index: usize, count: usize },

    #[error(transparent)]
    Message(#[from] MessageError),
}

/// One envelope matched by one rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub matcher_index: usize,
    pub envelope: Envelope,
}

impl Job {
    pub fn new(matcher_index: usize, envelope: Envelope) -> Self {
        Self {
            matcher_index,
            envelope,
        }
    }

    pub fn to_frames(&self) -> Frames {
        let mut frames = Vec::with_capacity(6);
        frames.push(Bytes::from(self.matcher_index.to_string()));
        frames.extend(self.envelope.encode());
        frames
    }

    pub fn from_frames(frames: &[Bytes]) -> Result<Self, JobError> {
        let (index, rest) = frames.split_first().ok_or(JobError::Empty)?;
        let matcher_index = std::str::from_utf8(index)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| JobError::InvalidIndex(String::from_utf8_lossy(index).into_owned()))?;
        let envelope = Envelope::decode(rest)?;
        Ok(Self::new(matcher_index, envelope))
    }
}

/// Fixed-size pool of workers sharing one job queue.
pub struct WorkerPool {
    queue: flume::Sender<Frames>,
    workers: JoinSet<()>,
}

impl WorkerPool {
    /// Spawn `count` workers. They stop when `cancel` fires or once the pool
    /// is shut down and the queue is drained.
    pub fn spawn(
        count: usize,
        matchers: Arc<[Matcher]>,
        runner: Arc<dyn CommandRunner>,
        cancel: CancellationToken,
    ) -> Self {
        let (queue, receiver) = flume::unbounded();
        let mut workers = JoinSet::new();

        debug!(count, "Starting workers");
        for id in 0..count {
            workers.spawn(work(
                id,
                receiver.clone(),
                Arc::clone(&matchers),
                Arc::clone(&runner),
                cancel.clone(),
            ));
        }

        Self { queue, workers }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Queue a job for the next free worker.
    pub fn dispatch(&self, job: &Job) {
        self.dispatch_frames(job.to_frames());
    }

    /// Queue a job already in wire form.
    pub fn dispatch_frames(&self, frames: Frames) {
        if self.queue.send(frames).is_err() {
            error!("Every worker has stopped, dropping job");
        }
    }

    /// Close the queue and wait for the workers to finish.
    pub async fn shutdown(self) {
        let Self { queue, mut workers } = self;
        drop(queue);
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Worker task failed");
            }
        }
    }
}

async fn work(
    id: usize,
    receiver: flume::Receiver<Frames>,
    matchers: Arc<[Matcher]>,
    runner: Arc<dyn CommandRunner>,
    cancel: CancellationToken,
) {
    loop {
        let frames = tokio::select! {
            _ = cancel.cancelled() => break,
            frames = receiver.recv_async() => match frames {
                Ok(frames) => frames,
                Err(_) => break,
            },
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = process(id, &frames, &matchers, runner.as_ref()) => {}
        }
    }
    debug!(worker = id, "Worker stopped");
}

/// Decode and run one job. Invalid jobs are logged and skipped.
pub(crate) async fn process(
    worker: usize,
    frames: &[Bytes],
    matchers: &[Matcher],
    runner: &dyn CommandRunner,
) -> Option<RunOutcome> {
    let job = match Job::from_frames(frames) {
        Ok(job) => job,
        Err(e) => {
            error!(worker, error = %e, "Invalid job");
            return None;
        }
    };
    let Some(matcher) = matchers.get(job.matcher_index) else {
        let e = JobError::IndexOutOfRange {
            index: job.matcher_index,
            count: matchers.len(),
        };
        error!(worker, error = %e, "Invalid job");
        return None;
    };
    let data = match job.envelope.parse_payload() {
        Ok(data) => data,
        Err(e) => {
            error!(worker, error = %e, "Invalid job");
            return None;
        }
    };

    debug!(worker, rule = %matcher.name(), topic = %job.envelope.topic(), "Running matcher");
    Some(
        matcher
            .run(runner, &job.envelope.variables(), &data)
            .await,
    )
}
