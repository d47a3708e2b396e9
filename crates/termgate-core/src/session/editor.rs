//! Line editor: turns raw keystroke frames into completed command lines.
//!
//! The browser terminal does not echo locally, so every accepted keystroke is
//! echoed back. The editor has a single accumulating state; each frame either
//! appends, erases one character, or submits.

use super::registry::{SessionHandle, SessionRegistry};
use crate::error::GateResult;
use crate::frames::{self, InputEvent};
use std::sync::Arc;
use tracing::debug;

/// What the channel should do after one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    /// Send this text back unchanged.
    Echo(String),
    /// The line was submitted. Carries the trimmed command when it is not
    /// blank. The buffer is already empty; the caller sends a fresh prompt
    /// once any command has been handled.
    Submitted(Option<String>),
}

/// Per-channel editor over the channel's session buffer.
pub struct LineEditor {
    registry: Arc<SessionRegistry>,
    handle: SessionHandle,
}

impl LineEditor {
    pub fn new(registry: Arc<SessionRegistry>, handle: SessionHandle) -> Self {
        Self { registry, handle }
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Apply one inbound frame to the buffer.
    pub async fn feed(&self, frame: &str) -> GateResult<EditOutcome> {
        match InputEvent::classify(frame) {
            InputEvent::Submit => {
                let line = self.registry.take(&self.handle).await?;
                let command = line.trim();
                if command.is_empty() {
                    Ok(EditOutcome::Submitted(None))
                } else {
                    debug!(session_key = %self.handle.key(), command = %command, "line submitted");
                    Ok(EditOutcome::Submitted(Some(command.to_string())))
                }
            }
            InputEvent::Erase => {
                self.registry.erase(&self.handle).await?;
                Ok(EditOutcome::Echo(frames::ERASE_ECHO.to_string()))
            }
            InputEvent::Text(text) => {
                self.registry.push(&self.handle, text).await?;
                Ok(EditOutcome::Echo(text.to_string()))
            }
        }
    }
}
