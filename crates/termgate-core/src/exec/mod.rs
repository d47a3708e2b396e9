//! Command execution: policy, dispatch, built-ins and external processes.
//!
//! # Data Flow
//!
//! ```text
//! completed line
//!   → Dispatcher::dispatch
//!       → CommandPolicy::check
//!           ✗ PolicyRejected → rejection notice + hint (nothing runs)
//!           ✓ Builtin        → BuiltinInterpreter::run
//!           ✓ External       → ExternalExecutor::run → ProcessRunner::run
//! ```

pub mod builtin;
pub mod dispatcher;
pub mod executor;
pub mod policy;
pub mod runner;

pub use builtin::BuiltinInterpreter;
pub use dispatcher::Dispatcher;
pub use executor::ExternalExecutor;
pub use policy::{Builtin, CommandPolicy, ExternalTier, Permit, Verdict};
pub use runner::{ProcessOutput, ProcessRunner, ShellRunner};

use std::path::PathBuf;
use std::time::Duration;

/// Timeouts and working directory for command execution.
#[derive(Debug, Clone)]
pub struct ExecSettings {
    /// Wall-clock bound for external commands.
    pub command_timeout: Duration,
    /// Bound for the `dir`/`ls` host listing.
    pub listing_timeout: Duration,
    /// Bound for the `whoami` host lookup.
    pub identity_timeout: Duration,
    /// Directory commands run in; `None` inherits the server's.
    pub working_dir: Option<PathBuf>,
}

impl Default for ExecSettings {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(60),
            listing_timeout: Duration::from_secs(10),
            identity_timeout: Duration::from_secs(5),
            working_dir: None,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::runner::{ProcessOutput, ProcessRunner};
    use crate::error::GateResult;
    use crate::error::GateError;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::time::Duration;

    type Respond = Box<dyn Fn(&str) -> GateResult<ProcessOutput> + Send + Sync>;

    /// Runner that records every call and answers from a script.
    pub(crate) struct ScriptedRunner {
        calls: Mutex<Vec<(String, Duration)>>,
        respond: Respond,
    }

    impl ScriptedRunner {
        pub(crate) fn new(
            respond: impl Fn(&str) -> GateResult<ProcessOutput> + Send + Sync + 'static,
        ) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                respond: Box::new(respond),
            }
        }

        pub(crate) fn with_output(output: ProcessOutput) -> Self {
            Self::new(move |_| Ok(output.clone()))
        }

        pub(crate) fn with_error(error: impl Fn() -> GateError + Send + Sync + 'static) -> Self {
            Self::new(move |_| Err(error()))
        }

        pub(crate) fn calls(&self) -> Vec<(String, Duration)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ProcessRunner for ScriptedRunner {
        fn run<'a>(
            &'a self,
            command: &'a str,
            timeout: Duration,
        ) -> Pin<Box<dyn Future<Output = GateResult<ProcessOutput>> + Send + 'a>> {
            self.calls
                .lock()
                .unwrap()
                .push((command.to_string(), timeout));
            let result = (self.respond)(command);
            Box::pin(async move { result })
        }
    }
}
