//! Inbound event routing.
//!
//! The connection loop hands every event envelope to the router, which
//! folds network events into the correlation table and fans the typed
//! event out through the subscription registry. Correlation runs first
//! so a subscriber woken by an event can immediately look up the
//! request record it describes.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tracing::{trace, warn};

use crate::error::Error;
use crate::protocol::EventMessage;

use super::correlation::CorrelationTable;
use super::registry::SubscriptionRegistry;

// ============================================================================
// ShutdownReason
// ============================================================================

/// Why event delivery is ending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShutdownReason {
    /// The session was closed locally.
    Closed,
    /// The transport failed or the remote end disconnected.
    Transport,
}

impl ShutdownReason {
    fn to_error(self) -> Error {
        match self {
            Self::Closed => Error::SessionClosed,
            Self::Transport => Error::ConnectionClosed,
        }
    }
}

// ============================================================================
// EventRouter
// ============================================================================

/// Routes inbound events to the correlation table and subscribers.
pub(crate) struct EventRouter {
    registry: Arc<SubscriptionRegistry>,
    correlation: Arc<CorrelationTable>,
}

impl EventRouter {
    pub fn new(registry: Arc<SubscriptionRegistry>, correlation: Arc<CorrelationTable>) -> Self {
        Self {
            registry,
            correlation,
        }
    }

    /// Routes one event envelope.
    ///
    /// Events outside the engine's surface are dropped with a trace
    /// log; envelopes with malformed params are dropped with a warning.
    /// Neither disturbs the connection.
    pub fn dispatch(&self, message: &EventMessage) {
        if message.kind().is_none() {
            trace!(method = %message.method, "Ignoring unrecognized event");
            return;
        }
        let Some(event) = message.parse() else {
            warn!(method = %message.method, "Dropping event with malformed params");
            return;
        };

        self.correlation.record_event(&event);
        self.registry.dispatch(&event);
    }

    /// Ends event delivery, failing every pending waiter exactly once.
    ///
    /// Safe to call from both the close path and the disconnect path;
    /// the first call wins.
    pub fn shutdown(&self, reason: ShutdownReason) {
        trace!(?reason, "Shutting down event delivery");
        self.registry.close(|| reason.to_error());
        self.correlation.close(|| reason.to_error());
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;

    use crate::events::correlation::{RequestPhase, WaitOutcome};
    use crate::identifiers::RequestId;
    use crate::protocol::{EventKind, SessionEvent};

    fn router() -> (EventRouter, Arc<SubscriptionRegistry>, Arc<CorrelationTable>) {
        let registry = Arc::new(SubscriptionRegistry::new());
        let correlation = Arc::new(CorrelationTable::new(Duration::from_secs(30), 1024));
        let router = EventRouter::new(Arc::clone(&registry), Arc::clone(&correlation));
        (router, registry, correlation)
    }

    fn envelope(method: &str, params: serde_json::Value) -> EventMessage {
        EventMessage {
            method: method.to_string(),
            params,
        }
    }

    #[tokio::test]
    async fn test_event_reaches_table_and_subscriber() {
        let (router, registry, correlation) = router();
        let (_id, mut rx, _) = registry
            .add_queue(EventKind::ResponseCompleted, None, 8)
            .expect("subscribe");

        router.dispatch(&envelope(
            "network.responseCompleted",
            json!({
                "context": "ctx-1",
                "request": { "request": "net-1", "method": "GET", "url": "https://e.com" },
                "response": { "url": "https://e.com", "status": 200, "statusText": "OK" }
            }),
        ));

        let event = rx.recv().await.expect("event");
        assert!(matches!(event, SessionEvent::ResponseCompleted { .. }));
        // The record is visible by the time the subscriber is woken.
        let record = correlation.get(&RequestId::new("net-1")).expect("record");
        assert!(record.phase_seen(RequestPhase::Completed));
    }

    #[test]
    fn test_unknown_event_is_ignored() {
        let (router, registry, correlation) = router();
        router.dispatch(&envelope("browsingContext.load", json!({})));
        assert_eq!(registry.subscription_count(), 0);
        assert_eq!(correlation.record_count(), 0);
    }

    #[test]
    fn test_malformed_params_are_dropped() {
        let (router, _, correlation) = router();
        // Missing the mandatory request field.
        router.dispatch(&envelope("network.beforeRequestSent", json!({})));
        assert_eq!(correlation.record_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_fails_waiters_once() {
        let (router, registry, correlation) = router();
        let (_id, event_rx, _) = registry
            .add_waiter(EventKind::ConsoleEntry, |_| true)
            .expect("waiter");
        let WaitOutcome::Pending(_, phase_rx) = correlation
            .begin_wait(&RequestId::new("net-1"), RequestPhase::Completed)
            .expect("wait")
        else {
            panic!("phase not yet observed");
        };

        router.shutdown(ShutdownReason::Transport);
        router.shutdown(ShutdownReason::Closed);

        assert!(matches!(
            event_rx.await.expect("resolved"),
            Err(Error::ConnectionClosed)
        ));
        assert!(matches!(
            phase_rx.await.expect("resolved"),
            Err(Error::ConnectionClosed)
        ));
    }
}
