//! Home-based storage paths for the agent.
//!
//! Everything lives under `~/.netconf-agent/`:
//! - `agent.log` - Agent log (stdout carries the protocol, so logs go here)
//! - `config.yaml` - Optional agent configuration
//! - `backend.port` - Port and auth token published by the backend

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// The name of the agent directory.
const AGENT_DIR: &str = ".netconf-agent";

/// Returns the home-based agent directory: `~/.netconf-agent/`
///
/// Creates the directory if it doesn't exist.
///
/// # Errors
///
/// Returns an error if:
/// - Home directory cannot be determined
/// - Directory creation fails
pub fn agent_home_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    let agent_dir = home.join(AGENT_DIR);
    fs::create_dir_all(&agent_dir)
        .with_context(|| format!("Failed to create agent directory: {}", agent_dir.display()))?;
    Ok(agent_dir)
}

/// Returns the log file path: `~/.netconf-agent/agent.log`
pub fn agent_log_path() -> Result<PathBuf> {
    Ok(agent_home_dir()?.join("agent.log"))
}

/// Returns the default config file path: `~/.netconf-agent/config.yaml`
pub fn config_path() -> Result<PathBuf> {
    Ok(agent_home_dir()?.join("config.yaml"))
}

/// Returns the backend port file path: `~/.netconf-agent/backend.port`
pub fn backend_port_path() -> Result<PathBuf> {
    Ok(agent_home_dir()?.join("backend.port"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_paths_live_under_agent_home() {
        let dir = tempfile::tempdir().unwrap();
        let original = std::env::var_os("HOME");
        std::env::set_var("HOME", dir.path());

        let home = agent_home_dir().unwrap();
        assert!(home.ends_with(AGENT_DIR));
        assert!(home.is_dir());
        assert_eq!(agent_log_path().unwrap(), home.join("agent.log"));
        assert_eq!(config_path().unwrap(), home.join("config.yaml"));
        assert_eq!(backend_port_path().unwrap(), home.join("backend.port"));

        match original {
            Some(value) => std::env::set_var("HOME", value),
            None => std::env::remove_var("HOME"),
        }
    }
}
