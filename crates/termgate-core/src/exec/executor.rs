//! External executor: runs an allowed command line out of process and
//! streams the captured result back as frames.

use super::runner::ProcessRunner;
use crate::channel::Outbound;
use crate::error::{GateError, GateResult};
use crate::frames;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct ExternalExecutor {
    runner: Arc<dyn ProcessRunner>,
    timeout: Duration,
}

impl ExternalExecutor {
    pub fn new(runner: Arc<dyn ProcessRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    /// Run `command` and report it on `out`.
    ///
    /// Frames on success: stdout (if any), stderr with a warning marker (if
    /// any), then the completion marker. A timeout yields only the timeout
    /// notice; a spawn failure only an error frame. The returned error is
    /// reserved for a closed channel.
    pub async fn run(&self, session_key: &str, command: &str, out: &Outbound) -> GateResult<()> {
        info!(session_key = %session_key, command = %command, "running external command");

        match self.runner.run(command, self.timeout).await {
            Ok(output) => {
                debug!(
                    session_key = %session_key,
                    exit_code = ?output.exit_code,
                    stdout_len = output.stdout.len(),
                    stderr_len = output.stderr.len(),
                    "external command finished"
                );
                if !output.stdout.is_empty() {
                    out.send(frames::stdout(&output.stdout)).await?;
                }
                if !output.stderr.is_empty() {
                    out.send(frames::stderr(&output.stderr)).await?;
                }
                out.send(frames::COMPLETED).await
            }
            Err(GateError::ExecutionTimeout(limit)) => {
                warn!(session_key = %session_key, command = %command, "external command timed out");
                out.send(frames::timed_out(limit.as_secs())).await
            }
            Err(GateError::ExecutionFailure(reason)) => {
                warn!(session_key = %session_key, error = %reason, "external command failed");
                out.send(frames::exec_error(&reason)).await
            }
            Err(e) => {
                warn!(session_key = %session_key, error = %e, "external command failed");
                out.send(frames::exec_error(&e.to_string())).await
            }
        }
    }
}
