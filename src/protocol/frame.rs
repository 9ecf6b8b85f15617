//! Client-facing wire frames.
//!
//! All communication with the client uses newline-delimited JSON (one frame
//! per line). Frames are externally tagged: `{"hello": {...}}`,
//! `{"rpc": {...}}`, `{"rpc-reply": {...}}`, `{"notification": {...}}`.

use super::{Element, ErrorTag, Reply, Rpc, RpcError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Frames sent by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClientFrame {
    Hello(ClientHello),
    Rpc(RpcFrame),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClientHello {
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Must be absent; only the server assigns session ids.
    #[serde(default)]
    pub session_id: Option<u32>,
}

/// An `rpc` frame as it arrives, before the message id is checked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RpcFrame {
    #[serde(default)]
    pub message_id: Option<String>,
    pub operation: String,
    #[serde(default)]
    pub content: Option<Element>,
}

impl RpcFrame {
    /// Converts into a request, rejecting frames without a message id.
    pub fn into_rpc(self) -> Result<Rpc, RpcError> {
        match self.message_id {
            Some(id) if !id.trim().is_empty() => Ok(Rpc {
                message_id: id,
                operation: self.operation,
                content: self.content,
            }),
            _ => {
                let error = RpcError::new(ErrorTag::MissingAttribute)
                    .with_bad_attribute("message-id")
                    .with_bad_element("rpc");
                Err(error)
            }
        }
    }
}

/// Frames sent by the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerFrame {
    Hello(ServerHello),
    RpcReply(ReplyFrame),
    Notification(NotificationFrame),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerHello {
    pub capabilities: Vec<String>,
    pub session_id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReplyFrame {
    /// Absent only when answering a request that had no usable message id.
    pub message_id: Option<String>,
    pub reply: Reply,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NotificationFrame {
    pub event_time: DateTime<Utc>,
    pub event: Element,
}

impl ServerFrame {
    /// Encodes the frame as one line, newline included.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}
