//! Notification delivery for one subscription.
//!
//! A `NotificationTask` runs detached next to the session loop. It pulls
//! event batches from the backend, forwards the ones the subscription selects
//! and ends on its own; nothing cancels it from outside. It only starts
//! streaming once the dispatcher confirms the subscription reply went out.

use crate::backend::BackendClient;
use crate::protocol::{Element, ErrorTag, Rpc, RpcError};
use crate::rpc::{EventCursor, EventRecord};
use crate::session::SubscriptionGuard;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::runtime::{Handle, TryCurrentError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Stream used when the request names none.
pub const DEFAULT_STREAM: &str = "NETCONF";

/// Namespace of the replayComplete and notificationComplete events.
pub const NOTIFICATION_NAMESPACE: &str = "urn:ietf:params:xml:ns:netmod:notification";

/// Parsed create-subscription parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub stream: String,
    /// Names of the event elements to forward; `None` forwards everything
    pub filter: Option<Vec<String>>,
    pub start_time: Option<DateTime<Utc>>,
    pub stop_time: Option<DateTime<Utc>>,
}

impl Default for Subscription {
    fn default() -> Self {
        Self {
            stream: DEFAULT_STREAM.to_string(),
            filter: None,
            start_time: None,
            stop_time: None,
        }
    }
}

impl Subscription {
    /// Validates a create-subscription request. `now` bounds the start time.
    ///
    /// A request without content subscribes to the default stream.
    pub fn from_rpc(rpc: &Rpc, now: DateTime<Utc>) -> Result<Self, RpcError> {
        let Some(content) = &rpc.content else {
            return Ok(Self::default());
        };
        if content.name != "create-subscription" {
            let error = RpcError::new(ErrorTag::OperationFailed);
            return Err(error.with_message("Corrupted RPC message."));
        }

        let mut subscription = Self::default();
        for child in &content.children {
            match child.name.as_str() {
                "stream" => {
                    let stream = child.text_content();
                    let stream = stream.trim();
                    if stream.is_empty() {
                        let error = RpcError::new(ErrorTag::BadElement)
                            .with_bad_element("stream")
                            .with_message("Empty stream name.");
                        return Err(error);
                    }
                    subscription.stream = stream.to_string();
                }
                "filter" => {
                    let names = child.children.iter().map(|e| e.name.clone()).collect();
                    subscription.filter = Some(names);
                }
                "startTime" => subscription.start_time = Some(parse_time(child)?),
                "stopTime" => subscription.stop_time = Some(parse_time(child)?),
                other => {
                    return Err(RpcError::new(ErrorTag::UnknownElement).with_bad_element(other));
                }
            }
        }

        match (subscription.start_time, subscription.stop_time) {
            (None, Some(_)) => {
                let error = RpcError::new(ErrorTag::MissingElement)
                    .with_bad_element("startTime")
                    .with_message("stopTime requires startTime.");
                return Err(error);
            }
            (Some(start), _) if start > now => {
                let error = RpcError::new(ErrorTag::BadElement)
                    .with_bad_element("startTime")
                    .with_message("startTime is in the future.");
                return Err(error);
            }
            (Some(start), Some(stop)) if stop < start => {
                let error = RpcError::new(ErrorTag::BadElement)
                    .with_bad_element("stopTime")
                    .with_message("stopTime is earlier than startTime.");
                return Err(error);
            }
            _ => {}
        }

        Ok(subscription)
    }

    /// True when `event` passes the filter and falls before the stop time.
    pub fn selects(&self, event: &EventRecord) -> bool {
        if self.stop_time.is_some_and(|stop| event.event_time > stop) {
            return false;
        }
        match &self.filter {
            None => true,
            Some(names) => names.iter().any(|n| *n == event.event.name),
        }
    }

    fn stop_reached(&self, now: DateTime<Utc>) -> bool {
        self.stop_time.is_some_and(|stop| now >= stop)
    }
}

fn parse_time(element: &Element) -> Result<DateTime<Utc>, RpcError> {
    let text = element.text_content();
    DateTime::parse_from_rfc3339(text.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            RpcError::new(ErrorTag::BadElement)
                .with_bad_element(element.name.as_str())
                .with_message(format!("Invalid time value: {}", e))
        })
}

/// Why a notification task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The subscription reply was never delivered
    NotStarted,
    StopTimeReached,
    StreamClosed,
    SessionGone,
    FeedFailed,
}

pub struct NotificationTask {
    guard: SubscriptionGuard,
    rpc: Rpc,
    subscription: Subscription,
    backend: BackendClient,
    poll_interval: Duration,
    start: oneshot::Receiver<()>,
}

impl NotificationTask {
    /// Builds the task plus the sender that releases it. Dropping the sender
    /// without sending ends the task before it streams anything.
    pub fn new(
        guard: SubscriptionGuard,
        rpc: Rpc,
        subscription: Subscription,
        backend: BackendClient,
        poll_interval: Duration,
    ) -> (Self, oneshot::Sender<()>) {
        let (tx, start) = oneshot::channel();
        let task = Self {
            guard,
            rpc,
            subscription,
            backend,
            poll_interval,
            start,
        };
        (task, tx)
    }

    /// Spawns the task on the current runtime.
    pub fn spawn(self) -> Result<JoinHandle<StreamEnd>, TryCurrentError> {
        let handle = Handle::try_current()?;
        Ok(handle.spawn(self.run()))
    }

    async fn run(mut self) -> StreamEnd {
        if (&mut self.start).await.is_err() {
            tracing::debug!(message_id = %self.rpc.message_id, "Subscription was not confirmed");
            return StreamEnd::NotStarted;
        }
        let end = self.stream().await;
        tracing::info!(
            message_id = %self.rpc.message_id,
            stream = %self.subscription.stream,
            end = ?end,
            "Notification delivery finished"
        );
        end
    }

    async fn stream(&self) -> StreamEnd {
        let session = self.guard.session();
        let sub = &self.subscription;
        let mut cursor = match sub.start_time {
            Some(start) => EventCursor::Since(start),
            None => EventCursor::Live,
        };
        let mut replaying = sub.start_time.is_some();

        loop {
            if !session.is_working() {
                return StreamEnd::SessionGone;
            }

            let batch = match self.backend.events(&sub.stream, cursor).await {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::warn!(error = %e, stream = %sub.stream, "Event feed failed");
                    return StreamEnd::FeedFailed;
                }
            };

            for record in batch.events {
                if !sub.selects(&record) {
                    continue;
                }
                let sent = session
                    .send_notification(record.event_time, record.event)
                    .await;
                if let Err(e) = sent {
                    tracing::debug!(error = %e, "Notification send failed");
                    return StreamEnd::SessionGone;
                }
            }
            cursor = EventCursor::After(batch.next_seq);
            if batch.more {
                continue;
            }

            if replaying {
                replaying = false;
                if self.send_marker("replayComplete").await.is_err() {
                    return StreamEnd::SessionGone;
                }
            }

            if batch.closed {
                return StreamEnd::StreamClosed;
            }

            let now = Utc::now();
            if sub.stop_reached(now) {
                if self.send_marker("notificationComplete").await.is_err() {
                    return StreamEnd::SessionGone;
                }
                return StreamEnd::StopTimeReached;
            }

            let mut wait = self.poll_interval;
            if let Some(stop) = sub.stop_time {
                if let Ok(until_stop) = (stop - now).to_std() {
                    wait = wait.min(until_stop);
                }
            }
            tokio::time::sleep(wait).await;
        }
    }

    async fn send_marker(&self, name: &str) -> std::io::Result<()> {
        self.guard
            .session()
            .send_notification(
                Utc::now(),
                Element::new(name).with_namespace(NOTIFICATION_NAMESPACE),
            )
            .await
    }
}

#[cfg(test)]
#[path = "tests/notifications_tests.rs"]
mod tests;
