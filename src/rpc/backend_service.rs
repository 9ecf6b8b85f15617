//! Backend service definition for agent → backend RPC.

use crate::rpc::{BackendResult, EventBatch, EventCursor, Reply, Rpc, SessionInfo};

/// Service exposed by the backend management server to agents.
#[tarpc::service]
pub trait BackendService {
    /// Authenticate with the backend.
    /// Must be called first when the backend was found through its port file.
    async fn authenticate(token: String) -> BackendResult<()>;

    /// Capability URIs the backend advertises to clients.
    async fn capabilities() -> BackendResult<Vec<String>>;

    /// Register a freshly accepted session.
    async fn register_session(info: SessionInfo) -> BackendResult<()>;

    /// Close the agent's session on the backend side.
    async fn close_session(session_id: String) -> BackendResult<()>;

    /// Terminate another session. Replies with an rpc-error when the target
    /// is unknown or is the caller itself.
    async fn kill_session(session_id: String, target: String) -> Reply;

    /// Execute any operation the agent does not handle itself.
    async fn operation(session_id: String, rpc: Rpc) -> Reply;

    /// Read the next batch of events of a notification stream.
    async fn events(stream: String, cursor: EventCursor) -> BackendResult<EventBatch>;
}
