//! Error types for the BiDi session engine.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use bidi_session::{Result, Session};
//!
//! async fn example(session: &Session) -> Result<()> {
//!     let context = session.create_context().await?;
//!     context.navigate("https://example.com", Default::default()).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants | Scope |
//! |----------|----------|-------|
//! | Transport | [`Error::Transport`], [`Error::ConnectionClosed`], [`Error::HandshakeTimeout`], [`Error::WebSocket`] | Fatal to the session; all pending waiters fail once |
//! | Protocol | [`Error::Protocol`], [`Error::InvalidArgument`], [`Error::PendingLimit`] | Local to the failing command |
//! | Timeout | [`Error::Timeout`], [`Error::CommandTimeout`] | Local to the wait; the remote operation is not cancelled |
//! | Lifecycle | [`Error::SessionClosed`] | Any operation after close |
//! | External | [`Error::Json`], [`Error::ChannelClosed`] | Conversions |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::CommandId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Transport failed to connect or failed mid-flight.
    ///
    /// Fatal to the owning session: every pending command and in-flight
    /// waiter is failed exactly once, then the session is closed.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// Connection closed unexpectedly.
    ///
    /// Returned when the transport stream ends during an operation.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Handshake did not complete within the configured timeout.
    #[error("Handshake timeout after {timeout_ms}ms")]
    HandshakeTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// A well-formed command was rejected by the remote end.
    ///
    /// Reported to the caller of that command only; other subscriptions
    /// and waiters are unaffected.
    #[error("Protocol error [{code}]: {message}")]
    Protocol {
        /// Machine-readable reason code from the remote end.
        code: String,
        /// Human-readable error message.
        message: String,
    },

    /// Invalid argument supplied to a local API.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    /// Too many commands awaiting responses.
    ///
    /// The command was not sent; the caller may retry after pending
    /// commands resolve.
    #[error("Too many pending commands ({pending} of {max})")]
    PendingLimit {
        /// Commands currently awaiting a response.
        pending: usize,
        /// Configured ceiling.
        max: usize,
    },

    // ========================================================================
    // Timeout Errors
    // ========================================================================
    /// A bounded wait exceeded its deadline.
    ///
    /// Local to that wait: the temporary subscription is removed and the
    /// underlying browser operation is not cancelled.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// No response to a command within the timeout.
    #[error("Command {id} timed out after {timeout_ms}ms")]
    CommandTimeout {
        /// The command id that timed out.
        id: CommandId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// Operation attempted after the session was closed.
    ///
    /// Always safe to check; [`Session::close`](crate::Session::close)
    /// itself is idempotent.
    #[error("Session closed")]
    SessionClosed,

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Internal channel closed while awaiting a result.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a transport error.
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a handshake timeout error.
    #[inline]
    pub fn handshake_timeout(timeout_ms: u64) -> Self {
        Self::HandshakeTimeout { timeout_ms }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates a command timeout error.
    #[inline]
    pub fn command_timeout(id: CommandId, timeout_ms: u64) -> Self {
        Self::CommandTimeout { id, timeout_ms }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::CommandTimeout { .. } | Self::HandshakeTimeout { .. }
        )
    }

    /// Returns `true` if this is a transport-level error.
    ///
    /// Transport errors are fatal to the owning session.
    #[inline]
    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::ConnectionClosed
                | Self::HandshakeTimeout { .. }
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this is a protocol rejection from the remote end.
    #[inline]
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }

    /// Returns `true` if the session is unusable after this error.
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.is_transport_error() || matches!(self, Self::SessionClosed)
    }
}

// ============================================================================
// Tests
// ============================================================================
