//! Client side of the backend channel.
//!
//! `BackendClient` wraps the tarpc `BackendServiceClient` and binds it to the
//! agent's session id. Control operations (capabilities, register, close)
//! return `anyhow::Result`; request operations (kill-session, generic
//! operation) always produce a `Reply`, turning channel failures into
//! operation-failed errors so the client still gets an answer.

use crate::agent_paths;
use crate::config::AgentConfig;
use crate::protocol::{Capabilities, Reply, Rpc};
use crate::rpc::backend_service::BackendServiceClient;
use crate::rpc::{EventBatch, EventCursor, PortFileContent, SessionInfo};
use anyhow::{Context, Result};
use std::time::Duration;
use tarpc::client;
use tarpc::context;
use tarpc::tokio_serde::formats::Bincode;

/// Base delay for exponential backoff between connection attempts (milliseconds).
const BASE_DELAY_MS: u64 = 100;

/// Connected backend channel.
#[derive(Clone)]
pub struct BackendClient {
    client: BackendServiceClient,
    session_id: String,
}

impl BackendClient {
    /// Connects to the backend, retrying with exponential backoff.
    ///
    /// The address comes from `backend_addr` when configured, otherwise from
    /// the backend port file, in which case the client authenticates with the
    /// token found there.
    pub async fn connect(config: &AgentConfig, session_id: u32) -> Result<Self> {
        use tarpc::serde_transport::tcp;

        let (addr, token) = resolve_endpoint(config)?;

        let mut attempt: u32 = 0;
        let transport = loop {
            attempt += 1;
            match tcp::connect(addr.as_str(), Bincode::default).await {
                Ok(transport) => break transport,
                Err(e) if attempt < config.connect_attempts => {
                    let delay = BASE_DELAY_MS.saturating_mul(1 << (attempt - 1).min(10));
                    tracing::debug!(%addr, attempt, error = %e, "Backend connect failed, retrying");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(e) => {
                    let message = format!(
                        "Cannot connect to backend at {} after {} attempts",
                        addr, attempt
                    );
                    return Err(e).context(message);
                }
            }
        };

        let client = BackendServiceClient::new(client::Config::default(), transport).spawn();
        let backend = Self::new(client, session_id.to_string());

        if let Some(token) = token {
            backend.authenticate(token).await?;
        }

        tracing::info!(%addr, session_id = backend.session_id(), "Connected to backend");
        Ok(backend)
    }

    /// Wraps an already connected tarpc client.
    pub fn new(client: BackendServiceClient, session_id: impl Into<String>) -> Self {
        Self {
            client,
            session_id: session_id.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn authenticate(&self, token: String) -> Result<()> {
        match self.client.authenticate(context::current(), token).await? {
            Ok(()) => Ok(()),
            Err(e) => anyhow::bail!("Backend error: {}", e),
        }
    }

    /// Capabilities the backend advertises.
    pub async fn capabilities(&self) -> Result<Capabilities> {
        match self.client.capabilities(context::current()).await? {
            Ok(list) => Ok(Capabilities::new(list)),
            Err(e) => anyhow::bail!("Backend error: {}", e),
        }
    }

    pub async fn register_session(&self, info: SessionInfo) -> Result<()> {
        match self
            .client
            .register_session(context::current(), info)
            .await?
        {
            Ok(()) => Ok(()),
            Err(e) => anyhow::bail!("Backend error: {}", e),
        }
    }

    /// Closes this agent's session on the backend.
    pub async fn close(&self) -> Result<()> {
        match self
            .client
            .close_session(context::current(), self.session_id.clone())
            .await?
        {
            Ok(()) => Ok(()),
            Err(e) => anyhow::bail!("Backend error: {}", e),
        }
    }

    /// Asks the backend to terminate session `target`.
    pub async fn kill_session(&self, target: &str) -> Reply {
        self.client
            .kill_session(
                context::current(),
                self.session_id.clone(),
                target.to_string(),
            )
            .await
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "kill-session request to backend failed");
                Reply::operation_failed("Failed to communicate with the backend.")
            })
    }

    /// Forwards a request the agent does not handle itself.
    pub async fn operation(&self, rpc: &Rpc) -> Reply {
        self.client
            .operation(context::current(), self.session_id.clone(), rpc.clone())
            .await
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, operation = %rpc.operation, "Backend request failed");
                Reply::operation_failed("Failed to communicate with the backend.")
            })
    }

    /// Reads the next batch of a notification stream.
    pub async fn events(&self, stream: &str, cursor: EventCursor) -> Result<EventBatch> {
        match self
            .client
            .events(context::current(), stream.to_string(), cursor)
            .await?
        {
            Ok(batch) => Ok(batch),
            Err(e) => anyhow::bail!("Backend error: {}", e),
        }
    }
}

/// Backend address and, when read from the port file, the auth token.
fn resolve_endpoint(config: &AgentConfig) -> Result<(String, Option<String>)> {
    if let Some(addr) = &config.backend_addr {
        return Ok((addr.clone(), None));
    }
    let port_path = agent_paths::backend_port_path()?;
    read_port_file(&port_path)
}

fn read_port_file(path: &std::path::Path) -> Result<(String, Option<String>)> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read backend port file: {}", path.display()))?;
    let port_info: PortFileContent = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse backend port file: {}", path.display()))?;
    let addr = format!("127.0.0.1:{}", port_info.port);
    Ok((addr, Some(port_info.token)))
}

#[cfg(test)]
pub(crate) mod test_backend;

#[cfg(test)]
#[path = "tests/client_tests.rs"]
mod tests;
