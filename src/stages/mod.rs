//! Pipeline stages.
//!
//! Every component of a running bus is a [`Stage`]: an independent task that
//! talks to the others only through transport endpoints.
//!
//! ```text
//!   Input ──push──▶ Core ──pub──┬──▶ Output
//!   Input ──push──▶             ├──▶ Reactor
//!                               └──▶ DbSink
//! ```

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub mod heartbeat;
pub mod input;
pub mod output;

pub use heartbeat::{Heartbeat, HeartbeatConfig};
pub use input::Input;
pub use output::Output;

/// A long running pipeline component.
#[async_trait]
pub trait Stage: Send {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Run until `cancel` fires or the stage's input closes.
    ///
    /// Every blocking wait observes `cancel`; no drain is required.
    async fn run(self: Box<Self>, cancel: CancellationToken);
}
