//! ReactOBus - a message bus with a command reactor
//!
//! Producers push topic-tagged envelopes to input stages; the core relay
//! stamps them and publishes them to every output, the reactor and the
//! message archive. The reactor runs external commands for envelopes that
//! match its rules.

pub mod config;
#[cfg(feature = "sqlite")]
pub mod db;
pub mod envelope;
pub mod filter;
pub mod lookup;
pub mod pipeline;
pub mod reactor;
pub mod relay;
pub mod stages;
pub mod transport;
pub mod utils;

pub use config::Config;
pub use envelope::Envelope;
pub use pipeline::{Pipeline, Registry};
pub use transport::Context;
