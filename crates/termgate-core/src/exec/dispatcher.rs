//! Command dispatcher: routes a completed line by the policy's verdict.

use super::builtin::BuiltinInterpreter;
use super::executor::ExternalExecutor;
use super::policy::{CommandPolicy, ExternalTier, Permit};
use super::runner::ProcessRunner;
use super::ExecSettings;
use crate::channel::Outbound;
use crate::error::{GateError, GateResult};
use crate::frames;
use std::sync::Arc;
use tracing::{info, warn};

/// Routes command lines to the built-in interpreter or the external executor.
pub struct Dispatcher {
    policy: Arc<CommandPolicy>,
    builtins: BuiltinInterpreter,
    executor: ExternalExecutor,
}

impl Dispatcher {
    pub fn new(
        policy: CommandPolicy,
        runner: Arc<dyn ProcessRunner>,
        settings: ExecSettings,
    ) -> Self {
        let policy = Arc::new(policy);
        let executor = ExternalExecutor::new(runner.clone(), settings.command_timeout);
        let builtins = BuiltinInterpreter::new(policy.clone(), runner, settings);
        Self {
            policy,
            builtins,
            executor,
        }
    }

    /// Handle one completed command line, writing all output to `out`.
    ///
    /// Blocked lines never reach the process runner. Failures are reported on
    /// the channel; the only error returned is a closed channel.
    pub async fn dispatch(&self, session_key: &str, command: &str, out: &Outbound) -> GateResult<()> {
        let permit = match self.policy.check(command) {
            Ok(permit) => permit,
            Err(GateError::PolicyRejected(rejected)) => {
                info!(session_key = %session_key, command = %rejected, "command blocked");
                out.send(frames::blocked(&rejected)).await?;
                return out.send(frames::usage_hint(self.policy.suggestion())).await;
            }
            Err(e) => return Err(e),
        };

        match permit {
            Permit::Builtin(builtin) => match self.builtins.run(builtin, out).await {
                Err(GateError::ChannelClosed) => Err(GateError::ChannelClosed),
                Err(e) => {
                    warn!(session_key = %session_key, builtin = builtin.name(), error = %e, "built-in failed");
                    out.send(frames::dispatch_error(&e.to_string())).await
                }
                Ok(()) => Ok(()),
            },
            Permit::External(tier) => {
                if tier == ExternalTier::Agent {
                    out.send(frames::agent_banner(command)).await?;
                }
                self.executor.run(session_key, command, out).await
            }
        }
    }
}
