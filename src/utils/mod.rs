//! Process-level helpers shared by the binaries and stages.

pub mod bootstrap;
pub mod retry;
