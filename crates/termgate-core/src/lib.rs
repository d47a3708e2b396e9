//! termgate-core: the session-scoped command channel behind the termgate gateway.
//!
//! Provides the per-session input registry and line editor, the command
//! allowlist policy, the built-in interpreter and external executor, the local
//! channel service, and the relay pump that forwards a channel to an external
//! terminal backend.

pub mod channel;
pub mod error;
pub mod exec;
pub mod frames;
pub mod local;
pub mod relay;
pub mod session;

// Re-export commonly used items at crate root.
pub use channel::Outbound;
pub use error::{GateError, GateResult};
pub use exec::{CommandPolicy, Dispatcher, ExecSettings, ProcessRunner, ShellRunner, Verdict};
pub use local::LocalGateway;
pub use relay::{BackendLocator, PairingReport, RelayGateway};
pub use session::{LineEditor, SessionHandle, SessionRegistry};
