//! Built-in interpreter for the fixed set of host-information commands.
//!
//! Most built-ins answer in-process. `dir`/`ls` and `whoami` ask the host
//! through the [`ProcessRunner`] with short timeouts.

use super::policy::{Builtin, CommandPolicy};
use super::runner::ProcessRunner;
use super::ExecSettings;
use crate::channel::Outbound;
use crate::error::GateResult;
use crate::frames;
use std::sync::Arc;
use tracing::debug;

/// Host command used for `dir` and `ls`.
#[cfg(windows)]
pub const LISTING_COMMAND: &str = "dir";
#[cfg(not(windows))]
pub const LISTING_COMMAND: &str = "ls";

/// Host command used for `whoami`.
pub const IDENTITY_COMMAND: &str = "whoami";

pub struct BuiltinInterpreter {
    policy: Arc<CommandPolicy>,
    runner: Arc<dyn ProcessRunner>,
    settings: ExecSettings,
}

impl BuiltinInterpreter {
    pub fn new(
        policy: Arc<CommandPolicy>,
        runner: Arc<dyn ProcessRunner>,
        settings: ExecSettings,
    ) -> Self {
        Self {
            policy,
            runner,
            settings,
        }
    }

    /// Run a built-in, writing its output to `out`.
    ///
    /// Errors from the host lookups are returned to the caller, which reports
    /// them on the channel.
    pub async fn run(&self, builtin: Builtin, out: &Outbound) -> GateResult<()> {
        debug!(builtin = builtin.name(), "running built-in");
        match builtin {
            Builtin::Help => out.send(self.help_text()).await,
            Builtin::Dir | Builtin::Ls => {
                let output = self
                    .runner
                    .run(LISTING_COMMAND, self.settings.listing_timeout)
                    .await?;
                let listing = if output.stdout.is_empty() {
                    "Directory listing completed"
                } else {
                    output.stdout.as_str()
                };
                out.send(format!("\r\n{listing}\r\n")).await
            }
            Builtin::Clear => {
                out.send(format!("\r\n{}", "\n".repeat(frames::CLEAR_LINES)))
                    .await
            }
            // Argument echo was never part of the command set; only the usage
            // line is sent.
            Builtin::Echo => out.send("\r\nUsage: echo <text>\r\n").await,
            Builtin::Date => {
                let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
                out.send(format!("\r\n📅 {now}\r\n")).await
            }
            Builtin::Pwd => {
                let dir = match self.settings.working_dir {
                    Some(ref dir) => dir.clone(),
                    None => std::env::current_dir()?,
                };
                out.send(format!("\r\n📁 {}\r\n", dir.display())).await
            }
            Builtin::Whoami => {
                let output = self
                    .runner
                    .run(IDENTITY_COMMAND, self.settings.identity_timeout)
                    .await?;
                let user = output.stdout.trim();
                let user = if user.is_empty() { "Unknown user" } else { user };
                out.send(format!("\r\n👤 {user}\r\n")).await
            }
        }
    }

    /// Help listing: built-ins with descriptions, then the agent allowlist.
    pub fn help_text(&self) -> String {
        let mut text = String::from("\r\n📋 Available Commands:\r\n");
        for builtin in Builtin::ALL {
            text.push_str(&format!("  {}: {}\r\n", builtin.name(), builtin.description()));
        }
        text.push_str("\r\n🤖 AI Agent Commands:\r\n");
        for cmd in self.policy.agent_commands() {
            text.push_str(&format!("  {cmd}\r\n"));
        }
        text
    }
}
