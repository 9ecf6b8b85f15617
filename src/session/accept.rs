//! Session accept: the hello exchange.
//!
//! The agent speaks first, announcing its capabilities and the session id,
//! then waits for the client hello. The session's capabilities are the ones
//! both sides announced.

use super::reader::{Readiness, SessionReader};
use super::Session;
use crate::identity::Identity;
use crate::protocol::frame::{ClientFrame, ServerFrame, ServerHello};
use crate::protocol::{Capabilities, BASE_1_0};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

/// Session accept parameters that come from configuration.
#[derive(Debug, Clone, Copy)]
pub struct AcceptOptions {
    pub session_id: u32,
    pub hello_timeout: Duration,
    pub max_frame_bytes: usize,
}

/// Accepts a session on `input`/`output` for `identity`.
///
/// `server_capabilities` is what the backend advertises; the base capability
/// is added when missing since the agent itself implements the base protocol.
pub async fn accept<R, W>(
    input: R,
    mut output: W,
    server_capabilities: Capabilities,
    identity: &Identity,
    options: AcceptOptions,
) -> Result<(Arc<Session>, SessionReader)>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let server_capabilities = if server_capabilities.has_base() {
        server_capabilities
    } else {
        Capabilities::new(std::iter::once(BASE_1_0).chain(server_capabilities.iter()))
    };

    let hello = ServerFrame::Hello(ServerHello {
        capabilities: server_capabilities.iter().map(str::to_string).collect(),
        session_id: options.session_id,
    });
    output
        .write_all(&hello.encode().context("Failed to encode hello")?)
        .await
        .context("Failed to send hello")?;
    output.flush().await.context("Failed to send hello")?;

    // One deadline for the whole exchange; blank lines do not extend it.
    let timeout = options.hello_timeout;
    let deadline = Instant::now() + timeout;
    let mut reader = SessionReader::spawn(input, options.max_frame_bytes);
    let frame = loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match reader.wait(remaining).await {
            Readiness::Timeout => anyhow::bail!("Client hello not received within {:?}", timeout),
            Readiness::HangUp => anyhow::bail!("Client closed the transport before hello"),
            Readiness::Error(e) => return Err(e).context("Failed to read client hello"),
            Readiness::Data => match reader.take_frame() {
                Some(Ok(bytes)) if bytes.trim_ascii().is_empty() => continue,
                Some(Ok(bytes)) => break bytes,
                Some(Err(reason)) => anyhow::bail!("Invalid client hello: {}", reason),
                None => continue,
            },
        }
    };

    let client_frame: ClientFrame =
        serde_json::from_slice(frame.trim_ascii()).context("Invalid client hello")?;
    let client_hello = match client_frame {
        ClientFrame::Hello(hello) => hello,
        ClientFrame::Rpc(_) => anyhow::bail!("Expected client hello, received a request"),
    };
    if let Some(id) = client_hello.session_id {
        anyhow::bail!("Client hello must not carry a session id (got {})", id);
    }

    let client_capabilities = Capabilities::new(&client_hello.capabilities);
    let negotiated = server_capabilities.negotiate(&client_capabilities);
    if !negotiated.has_base() {
        anyhow::bail!("No common base protocol capability with the client");
    }

    tracing::debug!(
        session_id = options.session_id,
        capabilities = negotiated.len(),
        "Hello exchange complete"
    );

    let session = Session::new(options.session_id, identity, negotiated, Box::new(output));
    Ok((Arc::new(session), reader))
}
