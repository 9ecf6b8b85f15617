//! Who is on the other end of the transport.
//!
//! The transport authenticates the client before the agent starts. With SSH
//! the agent already runs as the user; with TLS the terminating proxy exports
//! the client certificate subject in an environment variable and the user name
//! is its common name.

use crate::rpc::TransportKind;
use anyhow::{Context, Result};

/// Authenticated client identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub transport: TransportKind,
}

impl Identity {
    pub fn ssh(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            transport: TransportKind::Ssh,
        }
    }

    pub fn tls(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            transport: TransportKind::Tls,
        }
    }

    /// Resolves the identity from the process environment.
    ///
    /// When `subject_var` is set the session is TLS and its value must carry a
    /// common name; otherwise the session is SSH and the user is the one the
    /// process runs as.
    pub fn from_env(subject_var: &str) -> Result<Self> {
        match std::env::var(subject_var) {
            Ok(subject) => {
                let cn = common_name(&subject)
                    .with_context(|| format!("Unable to get username from {}", subject_var))?;
                Ok(Self::tls(cn))
            }
            Err(_) => Ok(Self::ssh(local_username()?)),
        }
    }
}

/// Extracts the common name from a certificate subject.
///
/// Accepts both the slash form (`/C=CZ/O=Org/CN=alice/emailAddress=...`) and
/// the comma form (`CN=alice,O=Org`).
pub fn common_name(subject: &str) -> Result<String> {
    let start = subject
        .match_indices("CN=")
        .map(|(idx, _)| idx)
        .find(|&idx| idx == 0 || matches!(subject.as_bytes()[idx - 1], b'/' | b',' | b' '))
        .context("Client certificate does not include commonName")?;
    let value = subject
        .get(start + 3..)
        .unwrap_or_default()
        .split(['/', ','])
        .next()
        .unwrap_or_default()
        .trim();
    if value.is_empty() {
        anyhow::bail!("Client certificate has an empty commonName");
    }
    Ok(value.to_string())
}

/// Name of the user the agent runs as.
fn local_username() -> Result<String> {
    for var in ["USER", "LOGNAME"] {
        if let Ok(name) = std::env::var(var) {
            if !name.trim().is_empty() {
                return Ok(name.trim().to_string());
            }
        }
    }
    let uid = nix::unistd::getuid();
    let user = nix::unistd::User::from_uid(uid)
        .context("Failed to look up the current user")?
        .with_context(|| format!("No passwd entry for uid {}", uid))?;
    Ok(user.name)
}

#[cfg(test)]
#[path = "tests/identity_tests.rs"]
mod tests;
