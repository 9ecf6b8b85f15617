//! Agent configuration.
//!
//! Every field has a default, so the agent runs without any config file.
//! Precedence: defaults < YAML file < environment overrides.

use crate::agent_paths;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding the backend address.
pub const BACKEND_ENV: &str = "NETCONF_AGENT_BACKEND";

/// Environment variable overriding the poll timeout (milliseconds).
pub const POLL_MS_ENV: &str = "NETCONF_AGENT_POLL_MS";

/// Environment variable overriding the log filter.
pub const LOG_ENV: &str = "NETCONF_AGENT_LOG";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    /// Upper bound on how long the session loop waits for input before it
    /// re-checks the shutdown flag.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// How long the client gets to send its hello.
    #[serde(default = "default_hello_timeout_ms")]
    pub hello_timeout_ms: u64,
    /// Backend address (`host:port`). When unset the backend port file is used.
    #[serde(default)]
    pub backend_addr: Option<String>,
    /// Connection attempts before startup gives up on the backend.
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    /// Interval between event feed reads of a notification stream.
    #[serde(default = "default_notification_poll_ms")]
    pub notification_poll_ms: u64,
    /// Largest frame accepted from the client.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Default log filter, e.g. "info" or "netconf_agent=debug".
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Environment variable holding the TLS client certificate subject.
    #[serde(default = "default_identity_env")]
    pub identity_env: String,
}

fn default_poll_timeout_ms() -> u64 {
    500
}

fn default_hello_timeout_ms() -> u64 {
    10_000
}

fn default_connect_attempts() -> u32 {
    5
}

fn default_notification_poll_ms() -> u64 {
    1_000
}

fn default_max_frame_bytes() -> usize {
    4 * 1024 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_identity_env() -> String {
    "SSL_CLIENT_DN".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: default_poll_timeout_ms(),
            hello_timeout_ms: default_hello_timeout_ms(),
            backend_addr: None,
            connect_attempts: default_connect_attempts(),
            notification_poll_ms: default_notification_poll_ms(),
            max_frame_bytes: default_max_frame_bytes(),
            log_level: default_log_level(),
            identity_env: default_identity_env(),
        }
    }
}

impl AgentConfig {
    /// Loads the configuration.
    ///
    /// An explicit path must exist. Without one, `~/.netconf-agent/config.yaml`
    /// is read when present. Environment overrides are applied last.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match agent_paths::config_path() {
                Ok(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content)?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var(BACKEND_ENV) {
            if !addr.trim().is_empty() {
                self.backend_addr = Some(addr.trim().to_string());
            }
        }
        if let Ok(ms) = std::env::var(POLL_MS_ENV) {
            self.poll_timeout_ms = ms
                .trim()
                .parse()
                .with_context(|| format!("{} must be a number of milliseconds", POLL_MS_ENV))?;
        }
        if let Ok(filter) = std::env::var(LOG_ENV) {
            if !filter.trim().is_empty() {
                self.log_level = filter.trim().to_string();
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.poll_timeout_ms == 0 {
            anyhow::bail!("poll_timeout_ms must be greater than zero");
        }
        if self.hello_timeout_ms == 0 {
            anyhow::bail!("hello_timeout_ms must be greater than zero");
        }
        if self.notification_poll_ms == 0 {
            anyhow::bail!("notification_poll_ms must be greater than zero");
        }
        if self.connect_attempts == 0 {
            anyhow::bail!("connect_attempts must be at least 1");
        }
        if self.max_frame_bytes == 0 {
            anyhow::bail!("max_frame_bytes must be greater than zero");
        }
        Ok(())
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn hello_timeout(&self) -> Duration {
        Duration::from_millis(self.hello_timeout_ms)
    }

    pub fn notification_poll_interval(&self) -> Duration {
        Duration::from_millis(self.notification_poll_ms)
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
