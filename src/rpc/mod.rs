//! RPC service definitions for the agent ↔ backend channel.
//!
//! This module defines the tarpc service the backend management server
//! exposes to agents, and the types exchanged over it:
//! - Session bookkeeping: capabilities, registration, close, kill
//! - Operation delegation: every request the agent does not handle itself
//! - Event feed: batches of notifications for create-subscription streams

pub mod backend_service;

use crate::protocol::Element;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Re-export the message model so backend implementations need one import.
pub use crate::protocol::{Reply, Rpc};

/// Transport the client session arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TransportKind {
    #[default]
    Ssh,
    Tls,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Ssh => write!(f, "ssh"),
            TransportKind::Tls => write!(f, "tls"),
        }
    }
}

/// Session metadata registered with the backend after the handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session id announced to the client in the hello
    pub session_id: String,
    /// Authenticated user name
    pub username: String,
    pub transport: TransportKind,
    /// Negotiated capabilities
    pub capabilities: Vec<String>,
    pub login_time: DateTime<Utc>,
    /// PID of the agent process serving the session
    pub pid: u32,
}

/// Where an event feed read starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventCursor {
    /// Only events produced from now on
    Live,
    /// Replay stored events with an event time at or after the given instant.
    /// A replay may span several batches; see `EventBatch::more`.
    Since(DateTime<Utc>),
    /// Events with a sequence number greater than the given one
    After(u64),
}

/// One event produced by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub seq: u64,
    pub stream: String,
    pub event_time: DateTime<Utc>,
    pub event: Element,
}

/// A batch returned by the event feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBatch {
    pub events: Vec<EventRecord>,
    /// Cursor value to pass as `EventCursor::After` on the next read
    pub next_seq: u64,
    /// Further events are already stored past `next_seq`; read again without
    /// waiting
    pub more: bool,
    /// The stream has ended; no further events will be produced
    pub closed: bool,
}

/// Port file written by the backend so agents can find and authenticate to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortFileContent {
    pub port: u16,
    pub token: String,
}

/// Errors returned by backend RPC methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BackendError {
    /// Authentication failed or was never performed
    AuthenticationFailed,
    /// Session not known to the backend
    SessionNotFound { session_id: String },
    /// No such event stream
    UnknownStream { stream: String },
    /// Backend is shutting down
    ShuttingDown,
    /// Internal error
    Internal { message: String },
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::AuthenticationFailed => write!(f, "Authentication failed"),
            BackendError::SessionNotFound { session_id } => {
                write!(f, "Session not found: {}", session_id)
            }
            BackendError::UnknownStream { stream } => write!(f, "Unknown event stream: {}", stream),
            BackendError::ShuttingDown => write!(f, "Backend is shutting down"),
            BackendError::Internal { message } => write!(f, "Internal error: {}", message),
        }
    }
}

impl std::error::Error for BackendError {}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

#[cfg(test)]
#[path = "tests/rpc_tests.rs"]
mod tests;
