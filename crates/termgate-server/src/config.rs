//! Server configuration: TOML file + environment + CLI overrides.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use termgate_core::exec::policy::DEFAULT_AGENT_COMMANDS;
use termgate_core::relay::locator::{DEFAULT_BACKENDS, DEFAULT_BACKEND_HOST};
use termgate_core::relay::DEFAULT_CONNECT_TIMEOUT;
use termgate_core::{BackendLocator, ExecSettings, GateError, GateResult};
use tracing::info;

/// How accepted channels are served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Run allowlisted commands on this host.
    #[default]
    Local,
    /// Forward each channel to its terminal backend.
    Relay,
}

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub exec: ExecSection,
    #[serde(default)]
    pub policy: PolicySection,
    #[serde(default)]
    pub relay: RelaySection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            mode: Mode::default(),
            max_sessions: default_max_sessions(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

/// `[exec]` section of the config TOML. Timeouts are in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecSection {
    #[serde(default = "default_command_timeout")]
    pub command_timeout: u64,
    #[serde(default = "default_listing_timeout")]
    pub listing_timeout: u64,
    #[serde(default = "default_identity_timeout")]
    pub identity_timeout: u64,
    #[serde(default)]
    pub working_dir: Option<String>,
}

impl Default for ExecSection {
    fn default() -> Self {
        Self {
            command_timeout: default_command_timeout(),
            listing_timeout: default_listing_timeout(),
            identity_timeout: default_identity_timeout(),
            working_dir: None,
        }
    }
}

/// `[policy]` section of the config TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicySection {
    /// Replaces the default agent allowlist when present.
    #[serde(default)]
    pub agent_commands: Option<Vec<String>>,
}

/// `[relay]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct RelaySection {
    #[serde(default = "default_relay_host")]
    pub host: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    #[serde(default = "default_backends")]
    pub backends: BTreeMap<String, u16>,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            host: default_relay_host(),
            connect_timeout: default_connect_timeout(),
            backends: default_backends(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_max_sessions() -> usize {
    64
}
fn default_allowed_origins() -> Vec<String> {
    ["localhost", "127.0.0.1"]
        .iter()
        .flat_map(|host| [3000, 3001, 8000].map(|port| format!("http://{host}:{port}")))
        .collect()
}
fn default_command_timeout() -> u64 {
    60
}
fn default_listing_timeout() -> u64 {
    10
}
fn default_identity_timeout() -> u64 {
    5
}
fn default_relay_host() -> String {
    DEFAULT_BACKEND_HOST.to_string()
}
fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_secs()
}
fn default_backends() -> BTreeMap<String, u16> {
    DEFAULT_BACKENDS
        .iter()
        .map(|(key, port)| (key.to_string(), *port))
        .collect()
}

/// CLI flags that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub port: Option<u16>,
    pub bind: Option<String>,
    pub mode: Option<Mode>,
    pub max_sessions: Option<usize>,
    pub command_timeout: Option<u64>,
}

/// Resolved server configuration (paths expanded, overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub mode: Mode,
    pub max_sessions: usize,
    pub allowed_origins: Vec<String>,
    pub exec: ExecSettings,
    pub agent_commands: Vec<String>,
    pub relay_host: String,
    pub relay_backends: BTreeMap<String, u16>,
    pub connect_timeout: Duration,
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, cli: &CliOverrides) -> GateResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    toml::from_str::<ConfigFile>(&content)
                        .map_err(|e| GateError::Config(format!("config parse error: {e}")))?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };
        Self::resolve(file_config, cli)
    }

    fn resolve(file: ConfigFile, cli: &CliOverrides) -> GateResult<Self> {
        let bind = cli.bind.clone().unwrap_or(file.server.bind);
        let port = cli.port.unwrap_or(file.server.port);
        let bind_addr = parse_bind_addr(&bind, port)?;

        let max_sessions = cli.max_sessions.unwrap_or(file.server.max_sessions);
        if max_sessions == 0 {
            return Err(GateError::Config("max_sessions must be at least 1".into()));
        }
        let command_timeout = cli.command_timeout.unwrap_or(file.exec.command_timeout);
        for (name, secs) in [
            ("command_timeout", command_timeout),
            ("listing_timeout", file.exec.listing_timeout),
            ("identity_timeout", file.exec.identity_timeout),
            ("connect_timeout", file.relay.connect_timeout),
        ] {
            if secs == 0 {
                return Err(GateError::Config(format!("{name} must be at least 1 second")));
            }
        }

        let exec = ExecSettings {
            command_timeout: Duration::from_secs(command_timeout),
            listing_timeout: Duration::from_secs(file.exec.listing_timeout),
            identity_timeout: Duration::from_secs(file.exec.identity_timeout),
            working_dir: file.exec.working_dir.as_deref().map(expand_tilde_str),
        };

        let agent_commands = file.policy.agent_commands.unwrap_or_else(|| {
            DEFAULT_AGENT_COMMANDS
                .iter()
                .map(|c| c.to_string())
                .collect()
        });

        Ok(Self {
            bind_addr,
            mode: cli.mode.unwrap_or(file.server.mode),
            max_sessions,
            allowed_origins: file.server.allowed_origins,
            exec,
            agent_commands,
            relay_host: file.relay.host,
            relay_backends: file.relay.backends,
            connect_timeout: Duration::from_secs(file.relay.connect_timeout),
        })
    }

    /// Backend mapping as configured, before environment overrides.
    pub fn locator(&self) -> BackendLocator {
        BackendLocator::new(self.relay_host.clone(), self.relay_backends.clone())
    }
}

fn parse_bind_addr(bind: &str, port: u16) -> GateResult<SocketAddr> {
    let host = if bind.contains(':') && !bind.starts_with('[') {
        format!("[{bind}]")
    } else {
        bind.to_string()
    };
    format!("{host}:{port}")
        .parse()
        .map_err(|e| GateError::Config(format!("invalid bind address {bind:?}: {e}")))
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
