//! Event subscription, correlation and routing.
//!
//! # Architecture
//!
//! | Component | Role |
//! |-----------|------|
//! | [`SubscriptionRegistry`](registry::SubscriptionRegistry) | Subscription bookkeeping and fan-out |
//! | [`CorrelationTable`](correlation::CorrelationTable) | Per-request lifecycle records |
//! | [`EventRouter`](router::EventRouter) | Bridges the connection loop to both |
//!
//! The connection loop parses inbound frames; every event envelope
//! flows through the router exactly once, in arrival order.

// ============================================================================
// Submodules
// ============================================================================

/// Request/response correlation keyed by request id.
pub mod correlation;

/// Subscription registry and fan-out delivery.
pub mod registry;

/// Inbound event routing.
pub mod router;

// ============================================================================
// Re-exports
// ============================================================================

pub use correlation::{RequestPhase, RequestRecord};
pub use registry::{ErrorSink, EventCallback, SubscriptionHandle};
