//! Transport abstraction and implementations.
//!
//! A transport carries opaque text frames both ways. Outbound frames go
//! through [`Transport::send`]; inbound frames arrive on an unbounded
//! channel handed out at construction, one message per `recv`, in
//! arrival order. The channel closing is the disconnect signal.
//!
//! # Implementations
//!
//! | Type | Backing |
//! |------|---------|
//! | [`WsTransport`] | WebSocket client connection |
//! | [`ChannelTransport`] | In-process channels, for tests |

// ============================================================================
// Submodules
// ============================================================================

/// In-process channel transport for tests.
pub mod channel;

/// The connection event loop and command correlation.
pub mod connection;

/// WebSocket transport.
pub mod ws;

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;

use crate::error::Result;

// ============================================================================
// Re-exports
// ============================================================================

pub use channel::{ChannelPeer, ChannelTransport};
pub(crate) use connection::Connection;
pub use ws::WsTransport;

// ============================================================================
// Transport Trait
// ============================================================================

/// A bidirectional frame transport.
///
/// Implementations must preserve frame order in both directions.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one text frame to the remote end.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the connection is gone; the
    /// caller treats any send failure as fatal.
    async fn send(&self, frame: String) -> Result<()>;

    /// Closes the transport. Idempotent.
    async fn close(&self) -> Result<()>;
}
