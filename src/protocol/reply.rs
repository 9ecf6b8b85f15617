//! Replies and structured errors.

use super::Element;
use serde::{Deserialize, Serialize};

/// Error category carried by an `rpc-error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorTag {
    InUse,
    InvalidValue,
    TooBig,
    MissingAttribute,
    BadAttribute,
    UnknownAttribute,
    MissingElement,
    BadElement,
    UnknownElement,
    UnknownNamespace,
    AccessDenied,
    LockDenied,
    ResourceDenied,
    RollbackFailed,
    DataExists,
    DataMissing,
    OperationNotSupported,
    OperationFailed,
    MalformedMessage,
}

impl ErrorTag {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorTag::InUse => "in-use",
            ErrorTag::InvalidValue => "invalid-value",
            ErrorTag::TooBig => "too-big",
            ErrorTag::MissingAttribute => "missing-attribute",
            ErrorTag::BadAttribute => "bad-attribute",
            ErrorTag::UnknownAttribute => "unknown-attribute",
            ErrorTag::MissingElement => "missing-element",
            ErrorTag::BadElement => "bad-element",
            ErrorTag::UnknownElement => "unknown-element",
            ErrorTag::UnknownNamespace => "unknown-namespace",
            ErrorTag::AccessDenied => "access-denied",
            ErrorTag::LockDenied => "lock-denied",
            ErrorTag::ResourceDenied => "resource-denied",
            ErrorTag::RollbackFailed => "rollback-failed",
            ErrorTag::DataExists => "data-exists",
            ErrorTag::DataMissing => "data-missing",
            ErrorTag::OperationNotSupported => "operation-not-supported",
            ErrorTag::OperationFailed => "operation-failed",
            ErrorTag::MalformedMessage => "malformed-message",
        }
    }

    /// Layer an error with this tag is reported against unless overridden.
    pub fn default_type(self) -> ErrorType {
        match self {
            ErrorTag::TooBig => ErrorType::Transport,
            ErrorTag::MissingAttribute
            | ErrorTag::BadAttribute
            | ErrorTag::UnknownAttribute
            | ErrorTag::MalformedMessage => ErrorType::Rpc,
            ErrorTag::DataExists | ErrorTag::DataMissing | ErrorTag::OperationFailed => {
                ErrorType::Application
            }
            _ => ErrorType::Protocol,
        }
    }

    pub fn default_message(self) -> &'static str {
        match self {
            ErrorTag::InUse => "The request requires a resource that already is in use.",
            ErrorTag::InvalidValue => {
                "The request specifies an unacceptable value for one or more parameters."
            }
            ErrorTag::TooBig => {
                "The request or response is too large for the implementation to handle."
            }
            ErrorTag::MissingAttribute => "An expected attribute is missing.",
            ErrorTag::BadAttribute => "An attribute value is not correct.",
            ErrorTag::UnknownAttribute => "An unexpected attribute is present.",
            ErrorTag::MissingElement => "An expected element is missing.",
            ErrorTag::BadElement => "An element value is not correct.",
            ErrorTag::UnknownElement => "An unexpected element is present.",
            ErrorTag::UnknownNamespace => "An unexpected namespace is present.",
            ErrorTag::AccessDenied => {
                "Access to the requested operation or data is denied because authorization failed."
            }
            ErrorTag::LockDenied => {
                "Access to the requested lock is denied because the lock is held by another entity."
            }
            ErrorTag::ResourceDenied => {
                "Request could not be completed because of insufficient resources."
            }
            ErrorTag::RollbackFailed => {
                "Request to roll back a configuration change was not completed."
            }
            ErrorTag::DataExists => {
                "Request could not be completed because the relevant data already exists."
            }
            ErrorTag::DataMissing => {
                "Request could not be completed because the relevant data does not exist."
            }
            ErrorTag::OperationNotSupported => {
                "The requested operation is not supported by this implementation."
            }
            ErrorTag::OperationFailed => {
                "The requested operation failed for a reason not covered by any other error."
            }
            ErrorTag::MalformedMessage => {
                "A message could not be handled because it failed to be parsed correctly."
            }
        }
    }
}

impl std::fmt::Display for ErrorTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol layer an error is reported against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorType {
    Transport,
    Rpc,
    Protocol,
    Application,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorSeverity {
    #[default]
    Error,
    Warning,
}

/// One structured error inside a failed reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RpcError {
    pub tag: ErrorTag,
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    #[serde(default)]
    pub severity: ErrorSeverity,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub bad_element: Option<String>,
    #[serde(default)]
    pub bad_attribute: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl RpcError {
    /// Creates an error with the tag's default type and message.
    pub fn new(tag: ErrorTag) -> Self {
        Self {
            tag,
            error_type: tag.default_type(),
            severity: ErrorSeverity::Error,
            message: Some(tag.default_message().to_string()),
            bad_element: None,
            bad_attribute: None,
            session_id: None,
        }
    }

    pub fn with_type(mut self, error_type: ErrorType) -> Self {
        self.error_type = error_type;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_bad_element(mut self, element: impl Into<String>) -> Self {
        self.bad_element = Some(element.into());
        self
    }

    pub fn with_bad_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.bad_attribute = Some(attribute.into());
        self
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag)?;
        if let Some(element) = &self.bad_element {
            write!(f, " ({})", element)?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

impl std::error::Error for RpcError {}

/// The single response to one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Reply {
    Ok,
    Data(Element),
    Error(Vec<RpcError>),
}

impl Reply {
    pub fn error(error: RpcError) -> Self {
        Reply::Error(vec![error])
    }

    /// Operation-failed error with a custom message.
    pub fn operation_failed(message: impl Into<String>) -> Self {
        Reply::error(RpcError::new(ErrorTag::OperationFailed).with_message(message))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    pub fn errors(&self) -> &[RpcError] {
        match self {
            Reply::Error(errors) => errors,
            _ => &[],
        }
    }
}
