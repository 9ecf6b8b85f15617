//! Read half of a session.
//!
//! A background task reads newline-delimited frames from the client input and
//! hands them over a channel. `SessionReader::wait` is the readiness wait the
//! session loop blocks on; `receive_one` turns the frame that became ready into
//! a request.

use super::{Session, SessionStatus};
use crate::protocol::frame::ClientFrame;
use crate::protocol::{Reply, Rpc};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Frames buffered between the reader task and the loop.
const INBOUND_CAPACITY: usize = 16;

enum Inbound {
    Frame(Vec<u8>),
    Oversized,
    Closed,
    Failed(io::Error),
}

enum Pending {
    Frame(Vec<u8>),
    Oversized,
}

/// Result of one readiness wait.
#[derive(Debug)]
pub enum Readiness {
    /// Nothing arrived within the timeout
    Timeout,
    /// A frame is ready for `receive_one`
    Data,
    /// The client closed its side of the transport
    HangUp,
    /// Reading from the transport failed
    Error(io::Error),
}

/// Result of one receive.
#[derive(Debug)]
pub enum Received {
    /// No request: blank frame, or a request the session layer answered itself
    Nothing,
    /// Frame could not be turned into a request
    Malformed(String),
    Rpc(Rpc),
}

/// Loop-owned read half of a session.
pub struct SessionReader {
    rx: mpsc::Receiver<Inbound>,
    pending: Option<Pending>,
    task: JoinHandle<()>,
}

impl SessionReader {
    /// Starts reading frames from `input`. Frames longer than
    /// `max_frame_bytes` (newline excluded) stop the reader.
    pub fn spawn<R>(input: R, max_frame_bytes: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        let task = tokio::spawn(read_frames(BufReader::new(input), max_frame_bytes, tx));
        Self {
            rx,
            pending: None,
            task,
        }
    }

    /// Waits up to `timeout` for input.
    ///
    /// Returns `Data` immediately if a frame is still pending from an earlier
    /// wait that was not followed by `receive_one`.
    pub async fn wait(&mut self, timeout: Duration) -> Readiness {
        if self.pending.is_some() {
            return Readiness::Data;
        }
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Err(_) => Readiness::Timeout,
            Ok(None) | Ok(Some(Inbound::Closed)) => Readiness::HangUp,
            Ok(Some(Inbound::Failed(e))) => Readiness::Error(e),
            Ok(Some(Inbound::Frame(bytes))) => {
                self.pending = Some(Pending::Frame(bytes));
                Readiness::Data
            }
            Ok(Some(Inbound::Oversized)) => {
                self.pending = Some(Pending::Oversized);
                Readiness::Data
            }
        }
    }

    /// Takes the pending frame without interpreting it. Used by the hello
    /// exchange, before there is a session to receive on.
    pub(crate) fn take_frame(&mut self) -> Option<Result<Vec<u8>, String>> {
        match self.pending.take()? {
            Pending::Frame(bytes) => Some(Ok(bytes)),
            Pending::Oversized => Some(Err("frame exceeds the size limit".to_string())),
        }
    }

    /// Receives the request that became ready in the last `wait`.
    ///
    /// An oversized frame cannot be resynchronized, so it marks the session
    /// failed. A request without a message id is answered here with a
    /// missing-attribute error and reported as `Nothing`.
    pub async fn receive_one(&mut self, session: &Session) -> Received {
        let bytes = match self.pending.take() {
            None => return Received::Nothing,
            Some(Pending::Oversized) => {
                session.mark(SessionStatus::Failed);
                return Received::Malformed("frame exceeds the size limit".to_string());
            }
            Some(Pending::Frame(bytes)) => bytes,
        };

        let frame = bytes.trim_ascii();
        if frame.is_empty() {
            return Received::Nothing;
        }

        match serde_json::from_slice::<ClientFrame>(frame) {
            Err(e) => Received::Malformed(format!("unparseable frame: {}", e)),
            Ok(ClientFrame::Hello(_)) => {
                Received::Malformed("hello received after the handshake".to_string())
            }
            Ok(ClientFrame::Rpc(frame)) => match frame.into_rpc() {
                Ok(rpc) => Received::Rpc(rpc),
                Err(error) => {
                    tracing::warn!(%error, "Request without message-id");
                    if let Err(e) = session.send_uncorrelated_reply(Reply::error(error)).await {
                        tracing::warn!(error = %e, "Failed to answer request without message-id");
                    }
                    Received::Nothing
                }
            },
        }
    }
}

impl std::fmt::Debug for SessionReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionReader")
            .field("pending", &self.pending.is_some())
            .field("finished", &self.task.is_finished())
            .finish_non_exhaustive()
    }
}

impl Drop for SessionReader {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn read_frames<R>(mut input: BufReader<R>, max_frame_bytes: usize, tx: mpsc::Sender<Inbound>)
where
    R: AsyncRead + Unpin,
{
    let limit = u64::try_from(max_frame_bytes)
        .unwrap_or(u64::MAX)
        .saturating_add(1);
    loop {
        let mut line = Vec::new();
        let read = (&mut input).take(limit).read_until(b'\n', &mut line).await;
        let inbound = match read {
            Ok(0) => Inbound::Closed,
            Ok(_) => {
                let content_len = if line.last() == Some(&b'\n') {
                    line.len() - 1
                } else {
                    line.len()
                };
                if content_len > max_frame_bytes {
                    Inbound::Oversized
                } else {
                    Inbound::Frame(line)
                }
            }
            Err(e) => Inbound::Failed(e),
        };
        let last = !matches!(inbound, Inbound::Frame(_));
        if tx.send(inbound).await.is_err() || last {
            return;
        }
    }
}
