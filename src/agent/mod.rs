//! The agent: one protocol session bridged to the backend.
//!
//! `run` does the startup handshake (backend capabilities, session accept,
//! registration) and hands over to `serve`, the request loop. The loop owns
//! the session reader and checks the shutdown flag between waits; a request
//! is always dispatched to completion before the flag is looked at again.

pub mod dispatch;
pub mod notifications;
pub mod shutdown;

use crate::backend::BackendClient;
use crate::config::AgentConfig;
use crate::identity::Identity;
use crate::session::accept::AcceptOptions;
use crate::session::{self, Readiness, Received, Session, SessionReader, SessionStatus};
use anyhow::{Context, Result};
use dispatch::Dispatcher;
use shutdown::ShutdownFlag;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// Why the session loop ended. Every variant is a normal exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Shutdown flag set by a signal or close-session
    Shutdown,
    /// The client closed its input
    PeerClosed,
    /// Reading from the transport failed
    TransportError,
    /// The session degraded while receiving
    SessionFailed,
}

/// Runs one agent session on `input`/`output` until the loop exits.
///
/// Errors are startup failures: no capabilities from the backend, failed
/// hello exchange, or failed registration.
pub async fn run<R, W>(
    config: &AgentConfig,
    identity: &Identity,
    session_id: u32,
    backend: BackendClient,
    input: R,
    output: W,
    shutdown: ShutdownFlag,
) -> Result<ExitReason>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let capabilities = backend
        .capabilities()
        .await
        .context("Failed to get capabilities from the backend")?;

    let options = AcceptOptions {
        session_id,
        hello_timeout: config.hello_timeout(),
        max_frame_bytes: config.max_frame_bytes,
    };
    let (session, reader) = session::accept(input, output, capabilities, identity, options)
        .await
        .with_context(|| format!("Failed to accept session for {}", identity.username))?;

    backend
        .register_session(session.info())
        .await
        .context("Failed to register the session with the backend")?;

    tracing::info!(
        session_id = session.id(),
        username = session.username(),
        transport = %identity.transport,
        capabilities = session.capabilities().len(),
        "Session established"
    );

    let dispatcher = Dispatcher::new(
        backend.clone(),
        shutdown.clone(),
        config.notification_poll_interval(),
    );
    let reason = serve(
        &session,
        reader,
        &backend,
        &dispatcher,
        &shutdown,
        config.poll_timeout(),
    )
    .await;

    tracing::info!(?reason, "Session loop finished");
    Ok(reason)
}

/// The request loop.
///
/// Waits up to `poll_timeout` for input so a shutdown request is noticed
/// while idle. On exit the session is marked closing, which also stops a
/// running notification task at its next step.
pub async fn serve(
    session: &Arc<Session>,
    mut reader: SessionReader,
    backend: &BackendClient,
    dispatcher: &Dispatcher,
    shutdown: &ShutdownFlag,
    poll_timeout: Duration,
) -> ExitReason {
    let reason = loop {
        if shutdown.is_set() {
            break ExitReason::Shutdown;
        }

        match reader.wait(poll_timeout).await {
            Readiness::Timeout => continue,
            Readiness::HangUp => {
                tracing::info!("Client closed the connection");
                session.mark(SessionStatus::Closing);
                if let Err(e) = backend.close().await {
                    tracing::warn!(error = %e, "Failed to close the session on the backend");
                }
                break ExitReason::PeerClosed;
            }
            Readiness::Error(e) => {
                tracing::error!(error = %e, "Failed to read from the client");
                session.mark(SessionStatus::Failed);
                break ExitReason::TransportError;
            }
            Readiness::Data => {
                let received = reader.receive_one(session).await;
                if !session.is_working() {
                    tracing::warn!(status = %session.status(), "Session is no longer usable");
                    break ExitReason::SessionFailed;
                }
                match received {
                    Received::Nothing => {}
                    Received::Malformed(reason) => {
                        tracing::warn!(%reason, "Ignoring malformed message");
                    }
                    Received::Rpc(rpc) => dispatcher.dispatch(session, &rpc).await,
                }
            }
        }
    };

    session.mark(SessionStatus::Closing);
    reason
}

#[cfg(test)]
#[path = "tests/agent_tests.rs"]
mod tests;
