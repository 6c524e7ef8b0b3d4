//! Input and output stage configuration.

use serde::Deserialize;

use crate::filter::FilterConfig;
use crate::stages::HeartbeatConfig;

/// One entry of `inputs` or `outputs`.
#[derive(Debug, Clone, Deserialize)]
pub struct StageConfig {
    /// Class discriminator resolved by the pipeline registry.
    pub class: String,
    /// Name used in logs.
    pub name: String,
    #[serde(default)]
    pub options: StageOptions,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StageOptions {
    /// External endpoint address.
    pub url: String,
    /// Output only: every filter must match for a message to be forwarded.
    pub filters: Vec<FilterConfig>,
    /// Output only: periodic heartbeat.
    pub heartbeat: Option<HeartbeatConfig>,
}
