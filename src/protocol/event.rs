//! Event message types.
//!
//! Events are unsolicited notifications from the remote end. The wire
//! envelope [`EventMessage`] is classified into a typed [`SessionEvent`]
//! before delivery to subscribers.
//!
//! # Event Kinds
//!
//! | [`EventKind`] | BiDi method |
//! |---------------|-------------|
//! | `ConsoleEntry` | `log.entryAdded` |
//! | `RequestSent` | `network.beforeRequestSent` |
//! | `ResponseStarted` | `network.responseStarted` |
//! | `ResponseCompleted` | `network.responseCompleted` |
//! | `FetchError` | `network.fetchError` |

// ============================================================================
// Imports
// ============================================================================

use base64::Engine;
use base64::engine::general_purpose::STANDARD as Base64Standard;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::{ContextId, RequestId};

// ============================================================================
// EventMessage
// ============================================================================

/// An event notification envelope from the remote end.
///
/// # Format
///
/// ```json
/// {
///   "type": "event",
///   "method": "module.eventName",
///   "params": { ... }
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct EventMessage {
    /// Event name in `module.eventName` format.
    pub method: String,

    /// Event-specific data.
    pub params: Value,
}

impl EventMessage {
    /// Returns the event kind, if this is an event the engine understands.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> Option<EventKind> {
        EventKind::from_method(&self.method)
    }

    /// Parses the envelope into a typed event.
    ///
    /// Returns `None` for event methods outside the engine's surface;
    /// such events are dropped by the router with a trace log.
    #[must_use]
    pub fn parse(&self) -> Option<SessionEvent> {
        match self.kind()? {
            EventKind::ConsoleEntry => {
                let params: LogEntryParams = serde_json::from_value(self.params.clone()).ok()?;
                Some(SessionEvent::ConsoleEntry(ConsoleLogEntry {
                    level: params.level,
                    method: params.method.unwrap_or_default(),
                    text: params.text.unwrap_or_default(),
                    context: params.source.and_then(|s| s.context),
                    timestamp: params.timestamp,
                }))
            }
            EventKind::RequestSent => {
                let params: NetworkParams = serde_json::from_value(self.params.clone()).ok()?;
                Some(SessionEvent::RequestSent {
                    context: params.context,
                    request: params.request,
                })
            }
            EventKind::ResponseStarted => {
                let params: NetworkParams = serde_json::from_value(self.params.clone()).ok()?;
                Some(SessionEvent::ResponseStarted {
                    context: params.context,
                    request: params.request,
                    response: params.response?,
                })
            }
            EventKind::ResponseCompleted => {
                let params: NetworkParams = serde_json::from_value(self.params.clone()).ok()?;
                Some(SessionEvent::ResponseCompleted {
                    context: params.context,
                    request: params.request,
                    response: params.response?,
                })
            }
            EventKind::FetchError => {
                let params: NetworkParams = serde_json::from_value(self.params.clone()).ok()?;
                Some(SessionEvent::FetchError {
                    context: params.context,
                    request: params.request,
                    error_text: params.error_text.unwrap_or_default(),
                })
            }
        }
    }
}

// ============================================================================
// EventKind
// ============================================================================

/// Classification tag for inbound events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A console log entry was emitted.
    ConsoleEntry,
    /// A network request is about to be sent.
    RequestSent,
    /// Response headers were received.
    ResponseStarted,
    /// A network response completed.
    ResponseCompleted,
    /// A network fetch failed.
    FetchError,
}

impl EventKind {
    /// All event kinds the engine understands.
    pub const ALL: [EventKind; 5] = [
        EventKind::ConsoleEntry,
        EventKind::RequestSent,
        EventKind::ResponseStarted,
        EventKind::ResponseCompleted,
        EventKind::FetchError,
    ];

    /// Returns the BiDi event method for this kind.
    #[inline]
    #[must_use]
    pub fn method(self) -> &'static str {
        match self {
            Self::ConsoleEntry => "log.entryAdded",
            Self::RequestSent => "network.beforeRequestSent",
            Self::ResponseStarted => "network.responseStarted",
            Self::ResponseCompleted => "network.responseCompleted",
            Self::FetchError => "network.fetchError",
        }
    }

    /// Maps a BiDi event method to a kind.
    #[inline]
    #[must_use]
    pub fn from_method(method: &str) -> Option<Self> {
        match method {
            "log.entryAdded" => Some(Self::ConsoleEntry),
            "network.beforeRequestSent" => Some(Self::RequestSent),
            "network.responseStarted" => Some(Self::ResponseStarted),
            "network.responseCompleted" => Some(Self::ResponseCompleted),
            "network.fetchError" => Some(Self::FetchError),
            _ => None,
        }
    }
}

// ============================================================================
// SessionEvent
// ============================================================================

/// A typed event delivered to subscribers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A console log entry.
    ConsoleEntry(ConsoleLogEntry),

    /// A network request is about to be sent.
    RequestSent {
        /// Originating context, when reported.
        context: Option<ContextId>,
        /// Request data.
        request: RequestData,
    },

    /// Response headers were received.
    ResponseStarted {
        /// Originating context, when reported.
        context: Option<ContextId>,
        /// Request data.
        request: RequestData,
        /// Partial response data.
        response: ResponseData,
    },

    /// A network response completed.
    ResponseCompleted {
        /// Originating context, when reported.
        context: Option<ContextId>,
        /// Request data.
        request: RequestData,
        /// Response data.
        response: ResponseData,
    },

    /// A network fetch failed.
    FetchError {
        /// Originating context, when reported.
        context: Option<ContextId>,
        /// Request data.
        request: RequestData,
        /// Error text reported by the browser.
        error_text: String,
    },
}

impl SessionEvent {
    /// Returns this event's kind.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ConsoleEntry(_) => EventKind::ConsoleEntry,
            Self::RequestSent { .. } => EventKind::RequestSent,
            Self::ResponseStarted { .. } => EventKind::ResponseStarted,
            Self::ResponseCompleted { .. } => EventKind::ResponseCompleted,
            Self::FetchError { .. } => EventKind::FetchError,
        }
    }

    /// Returns the originating context, when reported.
    #[inline]
    #[must_use]
    pub fn context(&self) -> Option<&ContextId> {
        match self {
            Self::ConsoleEntry(entry) => entry.context.as_ref(),
            Self::RequestSent { context, .. }
            | Self::ResponseStarted { context, .. }
            | Self::ResponseCompleted { context, .. }
            | Self::FetchError { context, .. } => context.as_ref(),
        }
    }

    /// Returns the network request id, for request-lifecycle events.
    #[inline]
    #[must_use]
    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            Self::ConsoleEntry(_) => None,
            Self::RequestSent { request, .. }
            | Self::ResponseStarted { request, .. }
            | Self::ResponseCompleted { request, .. }
            | Self::FetchError { request, .. } => Some(&request.id),
        }
    }
}

// ============================================================================
// ConsoleLogEntry
// ============================================================================

/// An immutable console log entry.
#[derive(Debug, Clone)]
pub struct ConsoleLogEntry {
    /// Severity level.
    pub level: LogLevel,
    /// Source console method, e.g. `log`, `warn`, `error`.
    pub method: String,
    /// Rendered message text.
    pub text: String,
    /// Originating context, when reported.
    pub context: Option<ContextId>,
    /// Timestamp in milliseconds since the epoch.
    pub timestamp: u64,
}

/// Severity of a console log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Debug-level entry.
    Debug,
    /// Informational entry.
    Info,
    /// Warning entry.
    Warn,
    /// Error entry.
    Error,
}

// ============================================================================
// Network Data
// ============================================================================

/// Data describing an outgoing network request.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestData {
    /// Protocol-assigned request id.
    #[serde(rename = "request")]
    pub id: RequestId,
    /// HTTP method.
    #[serde(default)]
    pub method: String,
    /// Request URL.
    #[serde(default)]
    pub url: String,
    /// Headers in wire order.
    #[serde(default)]
    pub headers: Vec<Header>,
}

/// Data describing a completed network response.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseData {
    /// Response URL (after redirects).
    #[serde(default)]
    pub url: String,
    /// HTTP status code.
    pub status: u16,
    /// HTTP status text.
    #[serde(rename = "statusText", default)]
    pub status_text: String,
    /// MIME type, when reported.
    #[serde(rename = "mimeType", default)]
    pub mime_type: String,
    /// Headers in wire order.
    #[serde(default)]
    pub headers: Vec<Header>,
}

/// One HTTP header as a name/value pair.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Header {
    /// Header name.
    pub name: String,
    /// Header value.
    pub value: HeaderValue,
}

/// A header value in one of the two wire representations.
///
/// BiDi transmits header values either as inline strings or as base64
/// bytes for values that are not valid UTF-8. One exhaustive match
/// replaces runtime type probing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HeaderValue {
    /// Value carried inline as a string.
    String {
        /// The header value.
        value: String,
    },
    /// Value carried as base64-encoded bytes.
    Base64 {
        /// Base64 encoding of the raw bytes.
        value: String,
    },
}

impl HeaderValue {
    /// Returns the raw value bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when base64 decoding fails.
    pub fn bytes(&self) -> Result<Vec<u8>> {
        match self {
            Self::String { value } => Ok(value.as_bytes().to_vec()),
            Self::Base64 { value } => Base64Standard
                .decode(value)
                .map_err(|e| Error::invalid_argument(format!("invalid base64 header value: {e}"))),
        }
    }

    /// Returns the value as text, replacing invalid UTF-8 sequences.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when base64 decoding fails.
    pub fn text(&self) -> Result<String> {
        match self {
            Self::String { value } => Ok(value.clone()),
            Self::Base64 { .. } => Ok(String::from_utf8_lossy(&self.bytes()?).into_owned()),
        }
    }
}

// ============================================================================
// Param Structs (wire shapes)
// ============================================================================

/// `log.entryAdded` params.
#[derive(Deserialize)]
struct LogEntryParams {
    level: LogLevel,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    timestamp: u64,
    #[serde(default)]
    source: Option<LogSource>,
}

/// `log.entryAdded` source field.
#[derive(Deserialize)]
struct LogSource {
    #[serde(default)]
    context: Option<ContextId>,
}

/// Shared shape of the `network.*` event params.
#[derive(Deserialize)]
struct NetworkParams {
    #[serde(default)]
    context: Option<ContextId>,
    request: RequestData,
    #[serde(default)]
    response: Option<ResponseData>,
    #[serde(rename = "errorText", default)]
    error_text: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(method: &str, params: Value) -> EventMessage {
        EventMessage {
            method: method.to_string(),
            params,
        }
    }

    #[test]
    fn test_console_entry_parsing() {
        let message = envelope(
            "log.entryAdded",
            json!({
                "type": "console",
                "level": "error",
                "method": "error",
                "text": "boom",
                "timestamp": 1_700_000_000_000u64,
                "source": { "realm": "r1", "context": "ctx-1" }
            }),
        );

        let Some(SessionEvent::ConsoleEntry(entry)) = message.parse() else {
            panic!("expected console entry");
        };
        assert_eq!(entry.level, LogLevel::Error);
        assert_eq!(entry.method, "error");
        assert_eq!(entry.text, "boom");
        assert_eq!(entry.context, Some(ContextId::new("ctx-1")));
        assert_eq!(entry.timestamp, 1_700_000_000_000);
    }

    #[test]
    fn test_before_request_sent_parsing() {
        let message = envelope(
            "network.beforeRequestSent",
            json!({
                "context": "ctx-1",
                "request": {
                    "request": "net-12",
                    "method": "GET",
                    "url": "https://example.com/a.js",
                    "headers": [
                        { "name": "accept", "value": { "type": "string", "value": "*/*" } }
                    ]
                }
            }),
        );

        let Some(SessionEvent::RequestSent { context, request }) = message.parse() else {
            panic!("expected request-sent event");
        };
        assert_eq!(context, Some(ContextId::new("ctx-1")));
        assert_eq!(request.id, RequestId::new("net-12"));
        assert_eq!(request.method, "GET");
        assert_eq!(request.headers.len(), 1);
    }

    #[test]
    fn test_response_completed_parsing() {
        let message = envelope(
            "network.responseCompleted",
            json!({
                "context": "ctx-1",
                "request": { "request": "net-12", "method": "GET", "url": "https://example.com" },
                "response": {
                    "url": "https://example.com",
                    "status": 200,
                    "statusText": "OK",
                    "mimeType": "text/html",
                    "headers": []
                }
            }),
        );

        let Some(SessionEvent::ResponseCompleted { response, .. }) = message.parse() else {
            panic!("expected response-completed event");
        };
        assert_eq!(response.status, 200);
        assert_eq!(response.mime_type, "text/html");
    }

    #[test]
    fn test_response_started_parsing() {
        let message = envelope(
            "network.responseStarted",
            json!({
                "context": "ctx-1",
                "request": { "request": "net-12", "method": "GET", "url": "https://example.com" },
                "response": { "url": "https://example.com", "status": 200, "statusText": "OK" }
            }),
        );

        let Some(SessionEvent::ResponseStarted { response, .. }) = message.parse() else {
            panic!("expected response-started event");
        };
        assert_eq!(response.status, 200);
        assert_eq!(response.mime_type, "");
    }

    #[test]
    fn test_fetch_error_parsing() {
        let message = envelope(
            "network.fetchError",
            json!({
                "context": "ctx-1",
                "request": { "request": "net-13", "method": "GET", "url": "https://example.com/x" },
                "errorText": "NS_ERROR_UNKNOWN_HOST"
            }),
        );

        let Some(SessionEvent::FetchError { error_text, .. }) = message.parse() else {
            panic!("expected fetch-error event");
        };
        assert_eq!(error_text, "NS_ERROR_UNKNOWN_HOST");
    }

    #[test]
    fn test_unknown_method_is_none() {
        let message = envelope("browsingContext.load", json!({}));
        assert!(message.kind().is_none());
        assert!(message.parse().is_none());
    }

    #[test]
    fn test_header_value_inline_text() {
        let value = HeaderValue::String {
            value: "text/html".to_string(),
        };
        assert_eq!(value.text().expect("decode"), "text/html");
    }

    #[test]
    fn test_header_value_base64_decodes() {
        // "hello" in base64.
        let value = HeaderValue::Base64 {
            value: "aGVsbG8=".to_string(),
        };
        assert_eq!(value.bytes().expect("decode"), b"hello");
        assert_eq!(value.text().expect("decode"), "hello");
    }

    #[test]
    fn test_header_value_bad_base64_errors() {
        let value = HeaderValue::Base64 {
            value: "!!not-base64!!".to_string(),
        };
        assert!(value.bytes().is_err());
    }

    #[test]
    fn test_header_value_wire_tag() {
        let header: Header = serde_json::from_value(json!({
            "name": "set-cookie",
            "value": { "type": "base64", "value": "aGVsbG8=" }
        }))
        .expect("deserialize");

        assert!(matches!(header.value, HeaderValue::Base64 { .. }));
    }

    #[test]
    fn test_event_accessors() {
        let message = envelope(
            "network.beforeRequestSent",
            json!({
                "context": "ctx-2",
                "request": { "request": "net-1", "method": "POST", "url": "https://e.com" }
            }),
        );
        let event = message.parse().expect("parse");

        assert_eq!(event.kind(), EventKind::RequestSent);
        assert_eq!(event.context(), Some(&ContextId::new("ctx-2")));
        assert_eq!(event.request_id(), Some(&RequestId::new("net-1")));
    }

    #[test]
    fn test_kind_method_roundtrip() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_method(kind.method()), Some(kind));
        }
    }
}
