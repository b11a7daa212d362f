//! WebDriver BiDi session engine.
//!
//! A client-side engine for the event-driven half of the WebDriver
//! BiDi protocol: session lifecycle, typed event subscriptions,
//! request/response correlation, bounded waits and scoped emulation
//! overrides, over a WebSocket (or any frame) transport.
//!
//! # Architecture
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`session`] | Session lifecycle, subscriptions, waits, overrides |
//! | [`events`] | Subscription registry, correlation table, routing |
//! | [`transport`] | Frame transports and the connection loop |
//! | [`protocol`] | Wire message and command types |
//! | [`identifiers`] | Type-safe protocol identifiers |
//! | [`config`] | Timeouts and resource bounds |
//! | [`error`] | Error taxonomy |
//!
//! One task per connection owns the transport; responses resolve
//! pending commands by id and events fan out through the subscription
//! registry, all in wire arrival order.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use bidi_session::{
//!     CreateContextKind, EventKind, ReadinessState, Session, SessionConfig, SessionEvent,
//! };
//!
//! # async fn example() -> bidi_session::Result<()> {
//! let session = Session::connect(
//!     "ws://127.0.0.1:9222/session",
//!     serde_json::json!({}),
//!     SessionConfig::default(),
//! )
//! .await?;
//!
//! let context = session.create_context(CreateContextKind::Tab).await?;
//! let mut console = session
//!     .subscribe(EventKind::ConsoleEntry, Some(context.id().clone()))
//!     .await?;
//!
//! context
//!     .navigate("https://example.com", ReadinessState::Complete)
//!     .await?;
//!
//! let entry = session
//!     .await_first(
//!         EventKind::ConsoleEntry,
//!         |event| matches!(event, SessionEvent::ConsoleEntry(e) if e.text.contains("ready")),
//!         Duration::from_secs(10),
//!     )
//!     .await?;
//! println!("page said: {entry:?}");
//!
//! while let Some(event) = console.recv().await {
//!     println!("console: {event:?}");
//! }
//!
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Modules
// ============================================================================

/// Session configuration.
pub mod config;

/// Error types.
pub mod error;

/// Event subscription, correlation and routing.
pub mod events;

/// Type-safe protocol identifiers.
pub mod identifiers;

/// Wire protocol types.
pub mod protocol;

/// Session lifecycle and operations.
pub mod session;

/// Frame transports and the connection loop.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::SessionConfig;
pub use error::{Error, Result};
pub use events::{ErrorSink, EventCallback, RequestPhase, RequestRecord, SubscriptionHandle};
pub use identifiers::{CommandId, ContextId, RequestId, SessionId, SubscriptionId};
pub use protocol::{
    ConsoleLogEntry, CreateContextKind, EventKind, GeolocationCoordinates, Header, HeaderValue,
    LogLevel, PermissionState, ReadinessState, RequestData, ResponseData, SessionEvent,
};
pub use session::{BrowsingContext, NavigationResult, Session};
pub use transport::{ChannelPeer, ChannelTransport, Transport, WsTransport};
