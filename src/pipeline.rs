//! Pipeline assembly.
//!
//! Turns a [`Config`] into a set of running stages:
//! - Core relay first, so both core endpoints exist
//! - Reactor and database sink when configured
//! - Outputs, then inputs
//!
//! Input and output classes are resolved through a [`Registry`]. Every class
//! is resolved before anything is bound, so a typo fails the whole build.

use std::collections::HashMap;

use futures::future::BoxFuture;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{Config, StageConfig};
#[cfg(feature = "sqlite")]
use crate::db::{DbError, DbSink};
use crate::filter::{FilterChain, FilterError};
use crate::reactor::{Reactor, RuleError};
use crate::relay::{CoreConfig, CoreRelay};
use crate::stages::{Input, Output, Stage};
use crate::transport::{Context, TransportError};

/// Result type for pipeline assembly.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    Db(#[from] DbError),

    #[error("Unknown {role} class '{kind}'")]
    UnknownComponentKind { role: Role, kind: String },
}

/// Which side of the core a stage sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Input,
    Output,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Input => write!(f, "input"),
            Role::Output => write!(f, "output"),
        }
    }
}

/// Future returned by a stage constructor.
pub type StageFuture<'a> = BoxFuture<'a, Result<Box<dyn Stage>>>;

/// Builds one input or output stage from its configuration entry.
pub type Constructor = for<'a> fn(&'a StageConfig, &'a Context, &'a CoreConfig) -> StageFuture<'a>;

/// Class discriminator to constructor maps.
pub struct Registry {
    inputs: HashMap<String, Constructor>,
    outputs: HashMap<String, Constructor>,
}

impl Registry {
    /// A registry without any class.
    pub fn empty() -> Self {
        Self {
            inputs: HashMap::new(),
            outputs: HashMap::new(),
        }
    }

    pub fn register_input(&mut self, class: impl Into<String>, constructor: Constructor) {
        self.inputs.insert(class.into(), constructor);
    }

    pub fn register_output(&mut self, class: impl Into<String>, constructor: Constructor) {
        self.outputs.insert(class.into(), constructor);
    }

    pub fn input(&self, class: &str) -> Result<Constructor> {
        self.inputs
            .get(class)
            .copied()
            .ok_or_else(|| PipelineError::UnknownComponentKind {
                role: Role::Input,
                kind: class.to_string(),
            })
    }

    pub fn output(&self, class: &str) -> Result<Constructor> {
        self.outputs
            .get(class)
            .copied()
            .ok_or_else(|| PipelineError::UnknownComponentKind {
                role: Role::Output,
                kind: class.to_string(),
            })
    }
}

impl Default for Registry {
    /// Built-in classes, including the legacy `ZMQ*` names.
    fn default() -> Self {
        let mut registry = Self::empty();
        for class in ["Pull", "ZMQPull"] {
            registry.register_input(class, pull_input);
        }
        for class in ["Sub", "ZMQSub"] {
            registry.register_input(class, sub_input);
        }
        for class in ["Push", "ZMQPush"] {
            registry.register_output(class, push_output);
        }
        for class in ["Pub", "ZMQPub"] {
            registry.register_output(class, pub_output);
        }
        registry
    }
}

// ============================================================================
// Built-in stage constructors
// ============================================================================

fn pull_input<'a>(
    stage: &'a StageConfig,
    ctx: &'a Context,
    core: &'a CoreConfig,
) -> StageFuture<'a> {
    Box::pin(async move {
        let source = ctx.bind_pull(&stage.options.url).await?;
        let inbound = ctx.connect_push(&core.inbound).await?;
        Ok(Box::new(Input::new(&stage.name, source, inbound)) as Box<dyn Stage>)
    })
}

fn sub_input<'a>(
    stage: &'a StageConfig,
    ctx: &'a Context,
    core: &'a CoreConfig,
) -> StageFuture<'a> {
    Box::pin(async move {
        let source = ctx.connect_sub(&stage.options.url).await?;
        let inbound = ctx.connect_push(&core.inbound).await?;
        Ok(Box::new(Input::new(&stage.name, source, inbound)) as Box<dyn Stage>)
    })
}

fn push_output<'a>(
    stage: &'a StageConfig,
    ctx: &'a Context,
    core: &'a CoreConfig,
) -> StageFuture<'a> {
    Box::pin(async move {
        let sink = ctx.connect_push(&stage.options.url).await?;
        output(stage, ctx, core, sink).await
    })
}

fn pub_output<'a>(
    stage: &'a StageConfig,
    ctx: &'a Context,
    core: &'a CoreConfig,
) -> StageFuture<'a> {
    Box::pin(async move {
        let sink = ctx.bind_pub(&stage.options.url).await?;
        output(stage, ctx, core, sink).await
    })
}

async fn output(
    stage: &StageConfig,
    ctx: &Context,
    core: &CoreConfig,
    sink: Box<dyn crate::transport::FrameSink>,
) -> Result<Box<dyn Stage>> {
    let filters = FilterChain::compile(&stage.options.filters)?;
    let source = ctx.connect_sub(&core.outbound).await?;

    let mut output = Output::new(&stage.name, source, sink).with_filters(filters);
    if let Some(heartbeat) = &stage.options.heartbeat {
        output = output.with_heartbeat(heartbeat.clone());
    }
    Ok(Box::new(output))
}

// ============================================================================
// Pipeline
// ============================================================================

/// Every stage of one bus, ready to run.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub async fn build(config: &Config, ctx: &Context, registry: &Registry) -> Result<Self> {
        let outputs = config
            .outputs
            .iter()
            .map(|stage| Ok((stage, registry.output(&stage.class)?)))
            .collect::<Result<Vec<_>>>()?;
        let inputs = config
            .inputs
            .iter()
            .map(|stage| Ok((stage, registry.input(&stage.class)?)))
            .collect::<Result<Vec<_>>>()?;

        let mut stages: Vec<Box<dyn Stage>> = Vec::new();

        info!(
            inbound = %config.core.inbound,
            outbound = %config.core.outbound,
            "Binding core"
        );
        stages.push(Box::new(CoreRelay::bind(ctx, &config.core).await?));

        if let Some(reactor) = &config.reactor {
            let source = ctx.connect_sub(&config.core.outbound).await?;
            let reactor = Reactor::new(reactor, source)?;
            info!(rules = reactor.matchers().len(), "Reactor configured");
            stages.push(Box::new(reactor));
        }

        #[cfg(feature = "sqlite")]
        if let Some(db) = &config.db {
            let source = ctx.connect_sub(&config.core.outbound).await?;
            stages.push(Box::new(DbSink::connect(db, source).await?));
        }

        for (stage, constructor) in outputs {
            info!(name = %stage.name, class = %stage.class, url = %stage.options.url, "Creating output");
            stages.push(constructor(stage, ctx, &config.core).await?);
        }

        for (stage, constructor) in inputs {
            info!(name = %stage.name, class = %stage.class, url = %stage.options.url, "Creating input");
            stages.push(constructor(stage, ctx, &config.core).await?);
        }

        Ok(Self { stages })
    }

    /// Stage names in start order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Run every stage until `cancel` fires and all of them have stopped.
    pub async fn run(self, cancel: CancellationToken) {
        let mut tasks = JoinSet::new();
        for stage in self.stages {
            let name = stage.name().to_string();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                stage.run(cancel).await;
                name
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(name) => info!(stage = %name, "Stage stopped"),
                Err(e) => error!(error = %e, "Stage task failed"),
            }
        }
    }
}
