//! In-process backend for tests.
//!
//! A real `BackendService` implementation served over tarpc, either through an
//! in-memory channel or TCP on localhost, so tests exercise the same client
//! code the agent runs in production.

use super::BackendClient;
use crate::agent::notifications::DEFAULT_STREAM;
use crate::protocol::{Element, ErrorTag, Reply, Rpc, RpcError, BASE_1_0, NOTIFICATION_CAPABILITY};
use crate::rpc::backend_service::{BackendService, BackendServiceClient};
use crate::rpc::{BackendError, BackendResult, EventBatch, EventCursor, EventRecord, SessionInfo};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use tarpc::server::{self, Channel};
use tarpc::tokio_serde::formats::Bincode;

/// Observable and configurable backend state.
#[derive(Debug)]
pub struct TestBackendState {
    pub capabilities: Vec<String>,
    pub token: Option<String>,
    pub authenticated: bool,
    pub fail_capabilities: bool,
    pub fail_register: bool,
    pub fail_close: bool,
    pub registered: Vec<SessionInfo>,
    pub close_calls: usize,
    pub kill_calls: Vec<(String, String)>,
    pub operations: Vec<Rpc>,
    pub events: Vec<EventRecord>,
    /// Once every stored event was handed out, report the stream closed
    pub stream_closed: bool,
    /// Most events handed out per read
    pub batch_limit: Option<usize>,
    pub event_reads: usize,
}

impl Default for TestBackendState {
    fn default() -> Self {
        Self {
            capabilities: vec![BASE_1_0.to_string(), NOTIFICATION_CAPABILITY.to_string()],
            token: None,
            authenticated: false,
            fail_capabilities: false,
            fail_register: false,
            fail_close: false,
            registered: Vec::new(),
            close_calls: 0,
            kill_calls: Vec::new(),
            operations: Vec::new(),
            events: Vec::new(),
            stream_closed: false,
            batch_limit: None,
            event_reads: 0,
        }
    }
}

#[derive(Clone, Default)]
pub struct TestBackend {
    state: Arc<Mutex<TestBackendState>>,
}

impl TestBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, TestBackendState> {
        self.state.lock().unwrap()
    }

    /// Stores an event on `stream` with the next sequence number.
    pub fn push_event(&self, stream: &str, event_time: DateTime<Utc>, name: &str) -> u64 {
        let mut state = self.state();
        let seq = state.events.last().map(|e| e.seq + 1).unwrap_or(1);
        state.events.push(EventRecord {
            seq,
            stream: stream.to_string(),
            event_time,
            event: Element::new(name),
        });
        seq
    }

    /// Serves this backend over an in-memory channel and returns a client
    /// bound to `session_id`.
    pub fn client(&self, session_id: &str) -> BackendClient {
        let (client_transport, server_transport) = tarpc::transport::channel::unbounded();
        let channel = server::BaseChannel::with_defaults(server_transport);
        let server = self.clone();
        tokio::spawn(async move {
            channel
                .execute(server.serve())
                .for_each(|response| async {
                    tokio::spawn(response);
                })
                .await;
        });
        let client =
            BackendServiceClient::new(tarpc::client::Config::default(), client_transport).spawn();
        BackendClient::new(client, session_id)
    }

    /// Serves this backend over TCP on localhost.
    pub async fn serve_tcp(&self) -> SocketAddr {
        use tarpc::serde_transport::tcp;

        let mut listener = tcp::listen("127.0.0.1:0", Bincode::default).await.unwrap();
        let addr = listener.local_addr();
        let backend = self.clone();
        tokio::spawn(async move {
            while let Some(Ok(transport)) = listener.next().await {
                let channel = server::BaseChannel::with_defaults(transport);
                let server = backend.clone();
                tokio::spawn(async move {
                    channel
                        .execute(server.serve())
                        .for_each(|response| async {
                            tokio::spawn(response);
                        })
                        .await;
                });
            }
        });
        addr
    }

    fn check_authenticated(&self) -> BackendResult<()> {
        let state = self.state();
        if state.token.is_some() && !state.authenticated {
            return Err(BackendError::AuthenticationFailed);
        }
        Ok(())
    }
}

impl BackendService for TestBackend {
    async fn authenticate(self, _: tarpc::context::Context, token: String) -> BackendResult<()> {
        let mut state = self.state();
        if state.token.as_deref() == Some(token.as_str()) {
            state.authenticated = true;
            Ok(())
        } else {
            Err(BackendError::AuthenticationFailed)
        }
    }

    async fn capabilities(self, _: tarpc::context::Context) -> BackendResult<Vec<String>> {
        self.check_authenticated()?;
        let state = self.state();
        if state.fail_capabilities {
            return Err(BackendError::Internal {
                message: "capabilities unavailable".to_string(),
            });
        }
        Ok(state.capabilities.clone())
    }

    async fn register_session(
        self,
        _: tarpc::context::Context,
        info: SessionInfo,
    ) -> BackendResult<()> {
        self.check_authenticated()?;
        let mut state = self.state();
        if state.fail_register {
            return Err(BackendError::ShuttingDown);
        }
        state.registered.push(info);
        Ok(())
    }

    async fn close_session(
        self,
        _: tarpc::context::Context,
        session_id: String,
    ) -> BackendResult<()> {
        let mut state = self.state();
        state.close_calls += 1;
        if state.fail_close {
            return Err(BackendError::SessionNotFound { session_id });
        }
        Ok(())
    }

    async fn kill_session(
        self,
        _: tarpc::context::Context,
        session_id: String,
        target: String,
    ) -> Reply {
        let mut state = self.state();
        state.kill_calls.push((session_id.clone(), target.clone()));
        if session_id == target {
            return Reply::error(
                RpcError::new(ErrorTag::InvalidValue).with_message("Cannot kill own session."),
            );
        }
        Reply::Ok
    }

    async fn operation(self, _: tarpc::context::Context, _session_id: String, rpc: Rpc) -> Reply {
        let operation = rpc.operation.clone();
        self.state().operations.push(rpc);
        Reply::Data(Element::new("data").with_text(operation))
    }

    async fn events(
        self,
        _: tarpc::context::Context,
        stream: String,
        cursor: EventCursor,
    ) -> BackendResult<EventBatch> {
        let mut state = self.state();
        state.event_reads += 1;
        let known = stream == DEFAULT_STREAM || state.events.iter().any(|e| e.stream == stream);
        if !known {
            return Err(BackendError::UnknownStream { stream });
        }
        let on_stream: Vec<&EventRecord> =
            state.events.iter().filter(|e| e.stream == stream).collect();
        let head = state.events.last().map(|e| e.seq).unwrap_or(0);

        let mut events: Vec<EventRecord> = match cursor {
            EventCursor::Live => Vec::new(),
            EventCursor::Since(since) => on_stream
                .into_iter()
                .filter(|e| e.event_time >= since)
                .cloned()
                .collect(),
            EventCursor::After(seq) => on_stream
                .into_iter()
                .filter(|e| e.seq > seq)
                .cloned()
                .collect(),
        };

        let more = state.batch_limit.is_some_and(|limit| events.len() > limit);
        let next_seq = match state.batch_limit {
            Some(limit) if more => {
                events.truncate(limit);
                events.last().map(|e| e.seq).unwrap_or(head)
            }
            _ => head,
        };

        Ok(EventBatch {
            events,
            next_seq,
            more,
            closed: state.stream_closed && !more,
        })
    }
}
