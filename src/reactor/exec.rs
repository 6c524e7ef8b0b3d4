//! Command execution.
//!
//! [`CommandRunner`] is the seam between matchers and the operating system;
//! [`ProcessRunner`] spawns real child processes.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::matcher::Invocation;

/// Errors that can occur while running a command.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("Command timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unable to launch '{binary}': {source}")]
    Launch {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Empty command line")]
    EmptyCommand,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Stdout followed by stderr.
    pub output: Vec<u8>,
}

/// Runs resolved command lines.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn execute(&self, invocation: &Invocation) -> Result<ExecOutput, ExecError>;
}

/// Spawns child processes; a timed out child is killed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn execute(&self, invocation: &Invocation) -> Result<ExecOutput, ExecError> {
        let (binary, args) = invocation
            .argv
            .split_first()
            .ok_or(ExecError::EmptyCommand)?;

        let mut child = Command::new(binary)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecError::Launch {
                binary: binary.clone(),
                source,
            })?;

        let stdin = child.stdin.take();
        let input = invocation.stdin.as_bytes();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // The command may exit without reading its input.
                let _ = stdin.write_all(input).await;
            }
        };
        let run = async move {
            let ((), output) = tokio::join!(feed, child.wait_with_output());
            output
        };

        // Dropping `run` on timeout drops the child, which kills it.
        let output = tokio::time::timeout(invocation.timeout, run)
            .await
            .map_err(|_| ExecError::Timeout(invocation.timeout))??;

        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);
        Ok(ExecOutput {
            exit_code: output.status.code(),
            output: combined,
        })
    }
}
