//! Message model for the management protocol.
//!
//! The same types travel on both sides of the agent: newline-delimited JSON
//! frames towards the client (see `frame.rs`) and bincode-encoded tarpc calls
//! towards the backend. Because of the latter, nothing in here may rely on
//! self-describing formats (no `serde_json::Value`, no internally tagged enums,
//! no skipped fields).

pub mod frame;
pub mod reply;

use serde::{Deserialize, Serialize};

pub use reply::{ErrorTag, ErrorType, Reply, RpcError};

/// Base capability for the end-of-message framed protocol version.
pub const BASE_1_0: &str = "urn:ietf:params:netconf:base:1.0";

/// Base capability for the chunk framed protocol version.
pub const BASE_1_1: &str = "urn:ietf:params:netconf:base:1.1";

/// Capability required for create-subscription.
pub const NOTIFICATION_CAPABILITY: &str = "urn:ietf:params:netconf:capability:notification:1.0";

/// A node of an operation's content tree.
///
/// Mirrors the shape of an XML element closely enough for the agent's needs:
/// a name, an optional namespace, optional text and ordered children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            text: None,
            children: Vec::new(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    #[cfg(test)]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    #[cfg(test)]
    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn first_child(&self) -> Option<&Element> {
        self.children.first()
    }

    /// Concatenated text of this element and all of its descendants,
    /// in document order.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        if let Some(text) = &self.text {
            out.push_str(text);
        }
        for child in &self.children {
            child.collect_text(out);
        }
    }
}

/// Operation kinds the agent treats specially.
///
/// Everything that is not handled locally is `Other` and goes to the backend
/// untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcKind {
    CloseSession,
    KillSession,
    CreateSubscription,
    Other,
}

impl RpcKind {
    pub fn of(operation: &str) -> Self {
        match operation {
            "close-session" => RpcKind::CloseSession,
            "kill-session" => RpcKind::KillSession,
            "create-subscription" => RpcKind::CreateSubscription,
            _ => RpcKind::Other,
        }
    }
}

impl std::fmt::Display for RpcKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcKind::CloseSession => write!(f, "close-session"),
            RpcKind::KillSession => write!(f, "kill-session"),
            RpcKind::CreateSubscription => write!(f, "create-subscription"),
            RpcKind::Other => write!(f, "other"),
        }
    }
}

/// A request received from the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rpc {
    pub message_id: String,
    /// Operation name used for classification.
    pub operation: String,
    /// Operation content. Its root element normally repeats the operation
    /// name; handlers that need the payload check this themselves.
    pub content: Option<Element>,
}

impl Rpc {
    #[cfg(test)]
    pub fn new(message_id: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            operation: operation.into(),
            content: None,
        }
    }

    #[cfg(test)]
    pub fn with_content(mut self, content: Element) -> Self {
        self.content = Some(content);
        self
    }

    pub fn kind(&self) -> RpcKind {
        RpcKind::of(&self.operation)
    }
}

/// An ordered, de-duplicated set of capability URIs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities(Vec<String>);

impl Capabilities {
    /// Builds a capability set, trimming entries and dropping blanks and
    /// duplicates while keeping first-seen order.
    pub fn new<I, S>(uris: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list: Vec<String> = Vec::new();
        for uri in uris {
            let uri = uri.as_ref().trim();
            if !uri.is_empty() && !list.iter().any(|u| u == uri) {
                list.push(uri.to_string());
            }
        }
        Self(list)
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.0.iter().any(|u| u == uri)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if at least one base protocol capability is present.
    pub fn has_base(&self) -> bool {
        self.contains(BASE_1_0) || self.contains(BASE_1_1)
    }

    /// Capabilities present on both sides, in our order.
    pub fn negotiate(&self, peer: &Capabilities) -> Capabilities {
        Capabilities(
            self.0
                .iter()
                .filter(|uri| peer.contains(uri))
                .cloned()
                .collect(),
        )
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
