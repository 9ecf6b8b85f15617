//! Request dispatch.
//!
//! Every request gets exactly one reply, sent here. close-session,
//! kill-session and create-subscription are handled by the agent; everything
//! else goes to the backend unchanged.

use super::notifications::{NotificationTask, Subscription};
use super::shutdown::ShutdownFlag;
use crate::backend::BackendClient;
use crate::protocol::{
    ErrorTag, ErrorType, Reply, Rpc, RpcError, RpcKind, NOTIFICATION_CAPABILITY,
};
use crate::session::{Session, SessionStatus};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

const DUPLICATE_SUBSCRIPTION: &str = "a subscription is already active on this session";

pub struct Dispatcher {
    backend: BackendClient,
    shutdown: ShutdownFlag,
    notification_poll: Duration,
}

impl Dispatcher {
    pub fn new(
        backend: BackendClient,
        shutdown: ShutdownFlag,
        notification_poll: Duration,
    ) -> Self {
        Self {
            backend,
            shutdown,
            notification_poll,
        }
    }

    /// Handles `rpc` and sends its reply on `session`.
    pub async fn dispatch(&self, session: &Arc<Session>, rpc: &Rpc) {
        let kind = rpc.kind();
        tracing::debug!(message_id = %rpc.message_id, %kind, "Dispatching request");

        let (reply, release) = match kind {
            RpcKind::CloseSession => (self.close_session(session).await, None),
            RpcKind::KillSession => (self.kill_session(rpc).await, None),
            RpcKind::CreateSubscription => self.create_subscription(session, rpc),
            RpcKind::Other => (self.backend.operation(rpc).await, None),
        };

        if reply.is_error() {
            for error in reply.errors() {
                tracing::debug!(message_id = %rpc.message_id, %error, "Request failed");
            }
        }

        match session.send_reply(rpc, reply).await {
            Ok(()) => {
                if let Some(release) = release {
                    // The task may already be gone if the session failed.
                    let _ = release.send(());
                }
            }
            Err(e) => {
                tracing::warn!(message_id = %rpc.message_id, error = %e, "Failed to send reply");
            }
        }
    }

    async fn close_session(&self, session: &Session) -> Reply {
        let reply = match self.backend.close().await {
            Ok(()) => Reply::Ok,
            Err(e) => {
                tracing::error!(error = %e, "Backend failed to close the session");
                Reply::operation_failed("Failed to close the session.")
            }
        };
        session.mark(SessionStatus::Closing);
        self.shutdown.set();
        reply
    }

    async fn kill_session(&self, rpc: &Rpc) -> Reply {
        let Some(content) = rpc.content.as_ref().filter(|c| c.name == "kill-session") else {
            tracing::error!("kill-session request without kill-session content");
            return Reply::operation_failed("Corrupted RPC message.");
        };
        let Some(target) = content.first_child().filter(|c| c.name == "session-id") else {
            let error = RpcError::new(ErrorTag::MissingElement);
            return Reply::error(error.with_bad_element("session-id"));
        };

        let target = target.text_content();
        let target = target.trim();
        tracing::info!(session_id = target, "Killing session");
        self.backend.kill_session(target).await
    }

    /// Returns the reply plus, on success, the sender that starts the
    /// notification task once the reply is out.
    fn create_subscription(
        &self,
        session: &Arc<Session>,
        rpc: &Rpc,
    ) -> (Reply, Option<oneshot::Sender<()>>) {
        if !session.has_capability(NOTIFICATION_CAPABILITY) {
            return (
                Reply::error(RpcError::new(ErrorTag::OperationNotSupported)),
                None,
            );
        }

        let Some(guard) = session.begin_subscription() else {
            tracing::warn!("Notification subscription is not allowed on this session");
            let error = RpcError::new(ErrorTag::OperationFailed)
                .with_type(ErrorType::Protocol)
                .with_message(DUPLICATE_SUBSCRIPTION);
            return (Reply::error(error), None);
        };

        let subscription = match Subscription::from_rpc(rpc, Utc::now()) {
            Ok(subscription) => subscription,
            Err(error) => return (Reply::error(error), None),
        };

        let stream = subscription.stream.clone();
        let (task, release) = NotificationTask::new(
            guard,
            rpc.clone(),
            subscription,
            self.backend.clone(),
            self.notification_poll,
        );
        match task.spawn() {
            Ok(_detached) => {
                tracing::info!(%stream, "Subscription started");
                (Reply::Ok, Some(release))
            }
            Err(e) => {
                tracing::error!(error = %e, "Creating task for sending notifications failed");
                (
                    Reply::operation_failed("Creating task for sending notifications failed."),
                    None,
                )
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/dispatch_tests.rs"]
mod tests;
