//! Rule-driven command reactor.
//!
//! This module contains:
//! - `matcher`: compiled rules, argument templating
//! - `exec`: the `CommandRunner` seam and the child process runner
//! - `worker`: job wire form and the worker pool
//!
//! The reactor subscribes to the core outbound stream, evaluates every rule
//! against every envelope and queues one job per matching rule.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub mod exec;
pub mod matcher;
pub mod worker;

pub use exec::{CommandRunner, ExecError, ExecOutput, ProcessRunner};
pub use matcher::{ArgSpec, Invocation, Matcher, RuleConfig, RunOutcome};
pub use worker::{Job, JobError, WorkerPool};

use crate::envelope::Envelope;
use crate::lookup::Variables;
use crate::stages::Stage;
use crate::transport::{FrameSource, TransportError};

/// Errors raised while compiling rules.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Rule '{rule}': invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        rule: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// The `reactor` configuration section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReactorConfig {
    pub workers: usize,
    pub rules: Vec<RuleConfig>,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            rules: Vec::new(),
        }
    }
}

pub struct Reactor {
    matchers: Arc<[Matcher]>,
    workers: usize,
    runner: Arc<dyn CommandRunner>,
    source: Box<dyn FrameSource>,
}

impl Reactor {
    /// Compile every rule. Commands run as child processes.
    pub fn new(config: &ReactorConfig, source: Box<dyn FrameSource>) -> Result<Self, RuleError> {
        let matchers = config
            .rules
            .iter()
            .map(Matcher::compile)
            .collect::<Result<Vec<_>, _>>()?;

        if config.workers == 0 {
            warn!("reactor.workers is 0, starting one worker");
        }

        Ok(Self {
            matchers: matchers.into(),
            workers: config.workers.max(1),
            runner: Arc::new(ProcessRunner),
            source,
        })
    }

    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn matchers(&self) -> &[Matcher] {
        &self.matchers
    }

    /// Indices of every rule matching the envelope.
    pub fn classify(&self, variables: &Variables, data: &Value) -> Vec<usize> {
        classify(&self.matchers, variables, data)
    }

    pub async fn run(self, cancel: CancellationToken) {
        let Self {
            matchers,
            workers,
            runner,
            mut source,
        } = self;

        info!(rules = matchers.len(), workers, "Reactor started");
        let pool = WorkerPool::spawn(workers, Arc::clone(&matchers), runner, cancel.clone());

        loop {
            let frames = tokio::select! {
                _ = cancel.cancelled() => break,
                frames = source.recv() => match frames {
                    Ok(frames) => frames,
                    Err(TransportError::Closed) => {
                        info!("Reactor input closed");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "Reactor receive failed");
                        break;
                    }
                },
            };

            let envelope = match Envelope::decode(&frames) {
                Ok(envelope) => envelope,
                Err(e) => {
                    error!(error = %e, "Invalid message");
                    continue;
                }
            };
            let data = match envelope.parse_payload() {
                Ok(data) => data,
                Err(e) => {
                    error!(topic = %envelope.topic(), error = %e, "Invalid message");
                    continue;
                }
            };

            let variables = envelope.variables();
            for index in classify(&matchers, &variables, &data) {
                debug!(topic = %envelope.topic(), rule = %matchers[index].name(), "Rule matched");
                pool.dispatch(&Job::new(index, envelope.clone()));
            }
        }

        pool.shutdown().await;
        info!("Reactor stopped");
    }
}

fn classify(matchers: &[Matcher], variables: &Variables, data: &Value) -> Vec<usize> {
    matchers
        .iter()
        .enumerate()
        .filter(|(_, matcher)| matcher.matches(variables, data))
        .map(|(index, _)| index)
        .collect()
}

#[async_trait]
impl Stage for Reactor {
    fn name(&self) -> &str {
        "reactor"
    }

    async fn run(self: Box<Self>, cancel: CancellationToken) {
        Reactor::run(*self, cancel).await
    }
}
