//! Protocol session over the client transport.
//!
//! A session is split in two halves:
//!
//! - **`Session`** (shared, `Arc`): identity, negotiated capabilities, status,
//!   the subscription slot and the serialized writer. The session loop and at
//!   most one notification task hold it at the same time.
//! - **`SessionReader`** (`reader.rs`, owned by the loop): turns input bytes
//!   into readiness events and requests.
//!
//! `accept.rs` performs the hello exchange that creates both halves.

pub mod accept;
pub mod reader;

use crate::identity::Identity;
use crate::protocol::frame::{NotificationFrame, ReplyFrame, ServerFrame};
use crate::protocol::{Capabilities, Element, Reply, Rpc};
use crate::rpc::{SessionInfo, TransportKind};
use chrono::{DateTime, Utc};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

pub use accept::accept;
pub use reader::{Readiness, Received, SessionReader};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Session status. Only ever moves forward: working → closing → failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionStatus {
    Working,
    Closing,
    Failed,
}

impl SessionStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionStatus::Working,
            1 => SessionStatus::Closing,
            _ => SessionStatus::Failed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SessionStatus::Working => 0,
            SessionStatus::Closing => 1,
            SessionStatus::Failed => 2,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Working => write!(f, "working"),
            SessionStatus::Closing => write!(f, "closing"),
            SessionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One accepted client session.
pub struct Session {
    id: u32,
    username: String,
    transport: TransportKind,
    capabilities: Capabilities,
    login_time: DateTime<Utc>,
    status: AtomicU8,
    subscription_active: AtomicBool,
    writer: Mutex<BoxedWriter>,
}

impl Session {
    pub(crate) fn new(
        id: u32,
        identity: &Identity,
        capabilities: Capabilities,
        writer: BoxedWriter,
    ) -> Self {
        Self {
            id,
            username: identity.username.clone(),
            transport: identity.transport,
            capabilities,
            login_time: Utc::now(),
            status: AtomicU8::new(SessionStatus::Working.as_u8()),
            subscription_active: AtomicBool::new(false),
            writer: Mutex::new(writer),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Advances the status. Attempts to move backwards are ignored.
    pub fn mark(&self, status: SessionStatus) {
        self.status.fetch_max(status.as_u8(), Ordering::AcqRel);
    }

    pub fn is_working(&self) -> bool {
        self.status() == SessionStatus::Working
    }

    pub fn has_capability(&self, uri: &str) -> bool {
        self.capabilities.contains(uri)
    }

    /// True when a new subscription could start on this session right now.
    pub fn notification_allowed(&self) -> bool {
        self.is_working() && !self.subscription_active.load(Ordering::Acquire)
    }

    /// Claims the session's single subscription slot.
    ///
    /// Returns `None` if a subscription is already active or the session is
    /// no longer working. The slot is released when the guard is dropped.
    pub fn begin_subscription(self: &Arc<Self>) -> Option<SubscriptionGuard> {
        if !self.notification_allowed() {
            return None;
        }
        self.subscription_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SubscriptionGuard {
                session: Arc::clone(self),
            })
    }

    /// Metadata registered with the backend.
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.id.to_string(),
            username: self.username.clone(),
            transport: self.transport,
            capabilities: self.capabilities.iter().map(str::to_string).collect(),
            login_time: self.login_time,
            pid: std::process::id(),
        }
    }

    /// Sends the reply correlated to `rpc`. The reply is consumed.
    pub async fn send_reply(&self, rpc: &Rpc, reply: Reply) -> io::Result<()> {
        self.send_frame(&ServerFrame::RpcReply(ReplyFrame {
            message_id: Some(rpc.message_id.clone()),
            reply,
        }))
        .await
    }

    /// Sends a reply to a request whose message id could not be used.
    pub(crate) async fn send_uncorrelated_reply(&self, reply: Reply) -> io::Result<()> {
        self.send_frame(&ServerFrame::RpcReply(ReplyFrame {
            message_id: None,
            reply,
        }))
        .await
    }

    pub async fn send_notification(
        &self,
        event_time: DateTime<Utc>,
        event: Element,
    ) -> io::Result<()> {
        self.send_frame(&ServerFrame::Notification(NotificationFrame {
            event_time,
            event,
        }))
        .await
    }

    /// Writes one frame. Frames from concurrent senders never interleave.
    /// A failed write marks the session failed.
    async fn send_frame(&self, frame: &ServerFrame) -> io::Result<()> {
        if self.status() == SessionStatus::Failed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "session has failed",
            ));
        }
        let bytes = frame
            .encode()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut writer = self.writer.lock().await;
        let result = async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        }
        .await;
        if result.is_err() {
            self.mark(SessionStatus::Failed);
        }
        result
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("transport", &self.transport)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Holds a session's subscription slot; dropping it frees the slot.
pub struct SubscriptionGuard {
    session: Arc<Session>,
}

impl SubscriptionGuard {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.session
            .subscription_active
            .store(false, Ordering::Release);
    }
}

#[cfg(test)]
pub(crate) mod test_client;

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
