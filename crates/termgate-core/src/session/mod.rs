//! Per-session input state: the buffer registry and the line editor.

pub mod editor;
pub mod registry;

pub use editor::{EditOutcome, LineEditor};
pub use registry::{SessionHandle, SessionInfo, SessionRegistry};
