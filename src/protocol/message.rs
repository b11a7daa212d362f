//! Command request/response envelopes and inbound message classification.
//!
//! # Wire Format
//!
//! Outbound command:
//!
//! ```json
//! { "id": 7, "method": "browsingContext.navigate", "params": { ... } }
//! ```
//!
//! Inbound messages carry a `type` discriminator:
//!
//! | `type` | Meaning |
//! |--------|---------|
//! | `success` | Command response with `result` |
//! | `error` | Command rejection with `error` code and `message` |
//! | `event` | Unsolicited event with `method` and `params` |

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::CommandId;

use super::Command;
use super::event::EventMessage;

// ============================================================================
// CommandRequest
// ============================================================================

/// A command request from local end to remote end.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CommandRequest {
    /// Unique identifier for request/response correlation.
    pub id: CommandId,

    /// Command with method and params.
    #[serde(flatten)]
    pub command: Command,
}

impl CommandRequest {
    /// Creates a new request with an auto-assigned id.
    #[inline]
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            id: CommandId::next(),
            command,
        }
    }
}

// ============================================================================
// CommandResponse
// ============================================================================

/// A command response from remote end to local end.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandResponse {
    /// Matches the command `id`.
    pub id: CommandId,

    /// Response type discriminator.
    #[serde(rename = "type")]
    pub response_type: ResponseType,

    /// Result data (if success).
    #[serde(default)]
    pub result: Option<Value>,

    /// Machine-readable error code (if error).
    #[serde(default)]
    pub error: Option<String>,

    /// Human-readable error message (if error).
    #[serde(default)]
    pub message: Option<String>,
}

impl CommandResponse {
    /// Extracts the result value, returning [`Error::Protocol`] on rejection.
    pub fn into_result(self) -> Result<Value> {
        match self.response_type {
            ResponseType::Success => Ok(self.result.unwrap_or(Value::Null)),
            ResponseType::Error => {
                let code = self.error.unwrap_or_else(|| "unknown error".to_string());
                let message = self.message.unwrap_or_else(|| code.clone());
                Err(Error::protocol(code, message))
            }
        }
    }

}

/// Response type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Successful response.
    Success,
    /// Error response.
    Error,
}

// ============================================================================
// IncomingMessage
// ============================================================================

/// A classified inbound message.
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    /// A command response, correlated by [`CommandId`].
    Response(CommandResponse),
    /// An unsolicited event.
    Event(EventMessage),
}

impl IncomingMessage {
    /// Parses and classifies one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] for malformed JSON and
    /// [`Error::InvalidArgument`] for a frame with an unknown `type`.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;

        match value.get("type").and_then(|t| t.as_str()) {
            Some("success" | "error") => {
                let response: CommandResponse = serde_json::from_value(value)?;
                Ok(Self::Response(response))
            }
            Some("event") => {
                let event: EventMessage = serde_json::from_value(value)?;
                Ok(Self::Event(event))
            }
            other => Err(Error::invalid_argument(format!(
                "unrecognized message type: {other:?}"
            ))),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BrowsingContextCommand, CreateContextKind};

    #[test]
    fn test_request_serialization() {
        let request = CommandRequest::new(Command::BrowsingContext(
            BrowsingContextCommand::Create {
                kind: CreateContextKind::Tab,
            },
        ));

        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(value["id"], request.id.value());
        assert_eq!(value["method"], "browsingContext.create");
        assert_eq!(value["params"]["type"], "tab");
    }

    #[test]
    fn test_success_response_classification() {
        let text = r#"{"type":"success","id":3,"result":{"context":"ctx-9"}}"#;
        let message = IncomingMessage::parse(text).expect("classify");

        let IncomingMessage::Response(response) = message else {
            panic!("expected response");
        };
        let result = response.into_result().expect("success");
        assert_eq!(result["context"], "ctx-9");
    }

    #[test]
    fn test_error_response_into_result() {
        let text = r#"{"type":"error","id":3,"error":"no such frame","message":"unknown context"}"#;
        let message = IncomingMessage::parse(text).expect("classify");

        let IncomingMessage::Response(response) = message else {
            panic!("expected response");
        };
        let err = response.into_result().unwrap_err();
        assert!(err.is_protocol_error());
        assert!(err.to_string().contains("no such frame"));
    }

    #[test]
    fn test_event_classification() {
        let text = r#"{"type":"event","method":"log.entryAdded","params":{"text":"hi"}}"#;
        let message = IncomingMessage::parse(text).expect("classify");
        assert!(matches!(message, IncomingMessage::Event(_)));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let text = r#"{"type":"banana","id":1}"#;
        assert!(IncomingMessage::parse(text).is_err());
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(matches!(
            IncomingMessage::parse("{not json"),
            Err(Error::Json(_))
        ));
    }
}
