//! Text frames exchanged on a client channel.
//!
//! The channel carries raw UTF-8 text with no envelope. Two single-character
//! inbound frames carry meaning; every other inbound frame is literal input.
//! Outbound notices are rendered here so that every component emits the same
//! terminal text.

/// Inbound frame that submits the current line.
pub const SUBMIT: &str = "\r";

/// Inbound frame that erases one character.
pub const ERASE: &str = "\x7f";

/// Prompt sent after every submit, whether or not a command ran.
pub const PROMPT: &str = "\r\n$ ";

/// Cursor-erase sequence echoed for [`ERASE`].
pub const ERASE_ECHO: &str = "\x08 \x08";

/// Number of newlines emitted by the `clear` built-in.
pub const CLEAR_LINES: usize = 50;

/// An inbound frame, classified by its protocol meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent<'a> {
    /// Carriage return: submit the buffer.
    Submit,
    /// DEL: remove the last buffered character.
    Erase,
    /// Anything else, appended verbatim.
    Text(&'a str),
}

impl<'a> InputEvent<'a> {
    /// Classify a raw inbound frame. Only exact single-character frames are
    /// control events; `"\r\n"` or `"a\r"` are plain text.
    pub fn classify(frame: &'a str) -> Self {
        match frame {
            SUBMIT => InputEvent::Submit,
            ERASE => InputEvent::Erase,
            other => InputEvent::Text(other),
        }
    }
}

/// Refusal of a command the policy does not permit.
pub fn blocked(command: &str) -> String {
    format!("\r\n❌ Command blocked: {command}\r\n")
}

/// Follow-up to [`blocked`] suggesting commands that are allowed.
pub fn usage_hint(suggestion: &str) -> String {
    format!("💡 Try: {suggestion}\r\n")
}

/// Announces an agent command before it starts running.
pub fn agent_banner(command: &str) -> String {
    format!("\r\n🚀 Executing AI agent command: {command}\r\n")
}

/// Captured standard output of an external command.
pub fn stdout(output: &str) -> String {
    format!("\r\n{output}\r\n")
}

/// Captured standard error, sent after [`stdout`].
pub fn stderr(output: &str) -> String {
    format!("\r\n⚠️  {output}\r\n")
}

/// Sent once an external command has finished, whatever its exit code.
pub const COMPLETED: &str = "✅ Command completed\r\n";

/// An external command ran past its timeout and was killed.
pub fn timed_out(secs: u64) -> String {
    format!("\r\n⏰ Command timed out after {secs} seconds\r\n")
}

/// Spawn or I/O failure inside the external executor.
pub fn exec_error(reason: &str) -> String {
    format!("\r\n❌ Error: {reason}\r\n")
}

/// Failure of a built-in or of the dispatch step itself.
pub fn dispatch_error(reason: &str) -> String {
    format!("\r\n❌ Error executing command: {reason}\r\n")
}

/// Last notice sent before a channel is forcibly closed.
pub fn fatal(reason: &str) -> String {
    format!("\r\n❌ {reason}\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_control_frames() {
        assert_eq!(InputEvent::classify("\r"), InputEvent::Submit);
        assert_eq!(InputEvent::classify("\x7f"), InputEvent::Erase);
        assert_eq!(InputEvent::classify("ls"), InputEvent::Text("ls"));
    }

    #[test]
    fn test_other_control_characters_are_text() {
        assert_eq!(InputEvent::classify("\r\n"), InputEvent::Text("\r\n"));
        assert_eq!(InputEvent::classify("\x08"), InputEvent::Text("\x08"));
        assert_eq!(InputEvent::classify("\x1b[A"), InputEvent::Text("\x1b[A"));
    }
}
