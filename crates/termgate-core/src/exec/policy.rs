//! Command policy: classifies a submitted line before anything runs.
//!
//! Three tiers are checked in order:
//!
//! | Tier      | Match                                   | Verdict                       |
//! |-----------|-----------------------------------------|-------------------------------|
//! | built-in  | exact, after trim + lowercase           | [`Verdict::Builtin`]          |
//! | agent     | case-insensitive substring              | [`ExternalTier::Agent`]       |
//! | basic     | case-insensitive prefix                 | [`ExternalTier::Basic`]       |
//!
//! Anything else is [`Verdict::Blocked`].
//!
//! # Limitation
//!
//! This is a conservative allowlist for the UI, not a security boundary. A
//! line only has to *contain* an agent token (`rm -rf ~; claude`) or *start
//! with* a basic prefix (`cdx`, `echo x; curl ...`) to be allowed, and the
//! allowed line is handed to the platform shell unchanged. Tightening the
//! matching is a policy change and belongs here, not in the executor.

use crate::error::{GateError, GateResult};
use tracing::warn;

/// Agent CLI invocations allowed by default.
pub const DEFAULT_AGENT_COMMANDS: &[&str] = &[
    "npx https://github.com/google-gemini/gemini-cli",
    "npm install -g @anthropic-ai/claude-code",
    "gemini",
    "claude-code",
    "claude",
];

/// Prefixes of ordinary host commands that may run externally.
pub const BASIC_PREFIXES: &[&str] = &[
    "whoami", "pwd", "ls", "dir", "echo", "date", "clear", "mkdir", "cd",
];

/// Commands implemented in-process by the built-in interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Help,
    Dir,
    Ls,
    Echo,
    Date,
    Clear,
    Pwd,
    Whoami,
}

impl Builtin {
    /// Every built-in, in help order.
    pub const ALL: [Builtin; 8] = [
        Builtin::Help,
        Builtin::Dir,
        Builtin::Ls,
        Builtin::Echo,
        Builtin::Date,
        Builtin::Clear,
        Builtin::Pwd,
        Builtin::Whoami,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Help => "help",
            Builtin::Dir => "dir",
            Builtin::Ls => "ls",
            Builtin::Echo => "echo",
            Builtin::Date => "date",
            Builtin::Clear => "clear",
            Builtin::Pwd => "pwd",
            Builtin::Whoami => "whoami",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Builtin::Help => "Show available commands",
            Builtin::Dir | Builtin::Ls => "List directory contents",
            Builtin::Echo => "Echo text",
            Builtin::Date => "Show current date/time",
            Builtin::Clear => "Clear terminal",
            Builtin::Pwd => "Show current directory",
            Builtin::Whoami => "Show current user",
        }
    }

    /// Look up a built-in by its exact (lowercase) name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.name() == name)
    }
}

/// Which external tier allowed a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalTier {
    /// Matched the agent allowlist.
    Agent,
    /// Matched a basic command prefix.
    Basic,
}

/// Classification of a command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Blocked,
    Builtin(Builtin),
    ExternalAllowed(ExternalTier),
}

/// A verdict that permits running something.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    Builtin(Builtin),
    External(ExternalTier),
}

/// The allowlist. Built-ins and basic prefixes are fixed; the agent list can
/// be replaced through configuration.
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    /// Agent commands as configured, for display.
    agent_commands: Vec<String>,
    /// Lowercased agent commands, for matching.
    agent_lower: Vec<String>,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_AGENT_COMMANDS.iter().map(|s| s.to_string()))
    }
}

impl CommandPolicy {
    /// Build a policy with the given agent allowlist.
    ///
    /// Blank entries are dropped: a blank substring would match every line.
    pub fn new(agent_commands: impl IntoIterator<Item = String>) -> Self {
        let agent_commands: Vec<String> = agent_commands
            .into_iter()
            .filter(|cmd| {
                let keep = !cmd.trim().is_empty();
                if !keep {
                    warn!("ignoring blank agent command in policy");
                }
                keep
            })
            .collect();
        let agent_lower = agent_commands.iter().map(|c| c.to_lowercase()).collect();
        Self {
            agent_commands,
            agent_lower,
        }
    }

    /// Classify a raw command line.
    pub fn classify(&self, raw: &str) -> Verdict {
        let command = raw.trim().to_lowercase();

        if let Some(builtin) = Builtin::from_name(&command) {
            return Verdict::Builtin(builtin);
        }

        if self.agent_lower.iter().any(|agent| command.contains(agent.as_str())) {
            return Verdict::ExternalAllowed(ExternalTier::Agent);
        }

        if BASIC_PREFIXES.iter().any(|prefix| command.starts_with(prefix)) {
            return Verdict::ExternalAllowed(ExternalTier::Basic);
        }

        Verdict::Blocked
    }

    /// Classify and reject blocked lines.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::PolicyRejected`] carrying the trimmed line when it
    /// matches no tier.
    pub fn check(&self, raw: &str) -> GateResult<Permit> {
        match self.classify(raw) {
            Verdict::Builtin(builtin) => Ok(Permit::Builtin(builtin)),
            Verdict::ExternalAllowed(tier) => Ok(Permit::External(tier)),
            Verdict::Blocked => Err(GateError::PolicyRejected(raw.trim().to_string())),
        }
    }

    pub fn agent_commands(&self) -> &[String] {
        &self.agent_commands
    }

    /// Command suggested to the user after a rejection.
    pub fn suggestion(&self) -> &str {
        self.agent_commands
            .first()
            .map(String::as_str)
            .unwrap_or(Builtin::Help.name())
    }
}
