//! Backend locator: maps a session key to the terminal backend serving it.

use crate::error::{GateError, GateResult};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// Backends known out of the box, one per terminal pane.
pub const DEFAULT_BACKENDS: &[(&str, u16)] = &[("pm", 7681), ("frontend", 7682), ("backend", 7683)];

/// Host the default backends listen on.
pub const DEFAULT_BACKEND_HOST: &str = "localhost";

/// Fixed mapping from session key to backend endpoint.
#[derive(Debug, Clone)]
pub struct BackendLocator {
    host: String,
    ports: BTreeMap<String, u16>,
}

impl Default for BackendLocator {
    fn default() -> Self {
        Self::new(
            DEFAULT_BACKEND_HOST,
            DEFAULT_BACKENDS.iter().map(|(k, p)| (k.to_string(), *p)),
        )
    }
}

impl BackendLocator {
    pub fn new(host: impl Into<String>, ports: impl IntoIterator<Item = (String, u16)>) -> Self {
        Self {
            host: host.into(),
            ports: ports.into_iter().collect(),
        }
    }

    /// Environment variable that overrides the port for `key`.
    pub fn env_var(key: &str) -> String {
        format!("TTYD_{}_PORT", key.to_uppercase())
    }

    /// Apply `TTYD_<KEY>_PORT` overrides from the process environment.
    pub fn from_env(self) -> GateResult<Self> {
        self.with_env_overrides(std::env::vars())
    }

    /// Apply `TTYD_<KEY>_PORT` overrides from `vars` to the configured keys.
    ///
    /// Only keys already present are overridden; the set of keys is fixed
    /// at start-up.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Config`] if an override is not a valid port.
    pub fn with_env_overrides(
        mut self,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> GateResult<Self> {
        let vars: HashMap<String, String> = vars.into_iter().collect();
        for (key, port) in self.ports.iter_mut() {
            let var = Self::env_var(key);
            if let Some(value) = vars.get(&var) {
                *port = value.trim().parse().map_err(|e| {
                    GateError::Config(format!("{var}={value:?} is not a valid port: {e}"))
                })?;
                debug!(session_key = %key, port = *port, "backend port overridden from environment");
            }
        }
        info!(host = %self.host, backends = ?self.ports, "backend locator ready");
        Ok(self)
    }

    /// Resolve `key` to a backend WebSocket URL.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::UnknownSessionKey`] for keys outside the mapping.
    pub fn locate(&self, key: &str) -> GateResult<String> {
        let port = self
            .ports
            .get(key)
            .ok_or_else(|| GateError::UnknownSessionKey(key.to_string()))?;
        Ok(format!("ws://{}:{}", self.host, port))
    }
}
