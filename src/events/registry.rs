//! Subscription registry and fan-out delivery.
//!
//! The registry maps (event kind, optional context scope) to an ordered
//! collection of delivery targets. Two target styles are supported:
//!
//! - **Queue**: events are pushed into a bounded channel drained through
//!   [`SubscriptionHandle::recv`]
//! - **Callback**: a closure invoked inline during dispatch
//!
//! Temporary predicate waiters back `await_first`; they are checked
//! before regular subscribers and removed on first match.
//!
//! # Locking
//!
//! One `parking_lot::Mutex` guards the whole registry. Registration,
//! removal and dispatch all take it, which closes the check-then-wait
//! race: a waiter registered under the lock can never miss an event
//! dispatched after registration returns. Callbacks run under the lock
//! and must not call back into the registry.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::identifiers::{ContextId, SubscriptionId};
use crate::protocol::{Command, CommandRequest, EventKind, SessionCommand, SessionEvent};
use crate::transport::Connection;

// ============================================================================
// Types
// ============================================================================

/// Callback target signature.
///
/// A returned error is reported to the error sink; it never propagates
/// to the router or to other subscribers.
pub type EventCallback =
    Box<dyn Fn(&SessionEvent) -> std::result::Result<(), String> + Send + Sync>;

/// Sink for per-subscriber delivery failures.
pub type ErrorSink = Box<dyn Fn(SubscriptionId, &str) + Send + Sync>;

/// Predicate used by temporary waiters.
type EventPredicate = Box<dyn Fn(&SessionEvent) -> bool + Send + Sync>;

/// Delivery target of one subscription.
enum DeliveryTarget {
    /// Bounded channel drained by the caller.
    Queue(mpsc::Sender<SessionEvent>),
    /// Closure invoked during dispatch.
    Callback(EventCallback),
}

/// One registered subscription.
struct SubscriptionEntry {
    id: SubscriptionId,
    kind: EventKind,
    scope: Option<ContextId>,
    target: DeliveryTarget,
}

/// One temporary predicate waiter.
struct WaiterEntry {
    id: SubscriptionId,
    kind: EventKind,
    predicate: EventPredicate,
    tx: Option<oneshot::Sender<Result<SessionEvent>>>,
}

/// Registry state behind the single lock.
struct RegistryState {
    /// Durable subscriptions in insertion order.
    entries: Vec<SubscriptionEntry>,
    /// Temporary waiters, checked before entries on dispatch.
    waiters: Vec<WaiterEntry>,
    /// Local interest count per event kind, for remote subscribe edges.
    kind_counts: FxHashMap<EventKind, usize>,
    /// Set once the owning session closes; no further registration.
    closed: bool,
}

// ============================================================================
// SubscriptionRegistry
// ============================================================================

/// Registry of event subscriptions and temporary waiters.
///
/// Shared between the session (registration) and the router (dispatch).
pub(crate) struct SubscriptionRegistry {
    state: Mutex<RegistryState>,
    error_sink: Mutex<Option<ErrorSink>>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                entries: Vec::new(),
                waiters: Vec::new(),
                kind_counts: FxHashMap::default(),
                closed: false,
            }),
            error_sink: Mutex::new(None),
        }
    }

    /// Installs the sink for subscriber delivery failures.
    ///
    /// Without a sink, failures are logged via `tracing::warn!`.
    pub fn set_error_sink(&self, sink: ErrorSink) {
        *self.error_sink.lock() = Some(sink);
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Adds a queue-backed subscription.
    ///
    /// Returns the subscription id, the receiving channel and whether
    /// this is the first local interest in `kind` (the caller must then
    /// enable remote delivery).
    pub fn add_queue(
        &self,
        kind: EventKind,
        scope: Option<ContextId>,
        capacity: usize,
    ) -> Result<(SubscriptionId, mpsc::Receiver<SessionEvent>, bool)> {
        let (tx, rx) = mpsc::channel(capacity);
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::SessionClosed);
        }

        let id = SubscriptionId::generate();
        state.entries.push(SubscriptionEntry {
            id,
            kind,
            scope,
            target: DeliveryTarget::Queue(tx),
        });
        let first = Self::acquire_kind(&mut state, kind);

        debug!(subscription = %id, ?kind, first, "Subscription registered");
        Ok((id, rx, first))
    }

    /// Adds a callback-backed subscription.
    pub fn add_callback(
        &self,
        kind: EventKind,
        scope: Option<ContextId>,
        callback: EventCallback,
    ) -> Result<(SubscriptionId, bool)> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::SessionClosed);
        }

        let id = SubscriptionId::generate();
        state.entries.push(SubscriptionEntry {
            id,
            kind,
            scope,
            target: DeliveryTarget::Callback(callback),
        });
        let first = Self::acquire_kind(&mut state, kind);

        debug!(subscription = %id, ?kind, first, "Callback subscription registered");
        Ok((id, first))
    }

    /// Registers a temporary predicate waiter for `await_first`.
    pub fn add_waiter<P>(
        &self,
        kind: EventKind,
        predicate: P,
    ) -> Result<(SubscriptionId, oneshot::Receiver<Result<SessionEvent>>, bool)>
    where
        P: Fn(&SessionEvent) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::SessionClosed);
        }

        let id = SubscriptionId::generate();
        state.waiters.push(WaiterEntry {
            id,
            kind,
            predicate: Box::new(predicate),
            tx: Some(tx),
        });
        let first = Self::acquire_kind(&mut state, kind);

        Ok((id, rx, first))
    }

    /// Acquires one unit of local interest in `kind` with no delivery
    /// target, keeping remote delivery enabled for the caller's wait.
    ///
    /// Returns `true` on the first interest. Pair with
    /// [`release_kind`](Self::release_kind).
    pub fn acquire_interest(&self, kind: EventKind) -> Result<bool> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::SessionClosed);
        }
        Ok(Self::acquire_kind(&mut state, kind))
    }

    // ========================================================================
    // Removal
    // ========================================================================

    /// Removes a subscription. Idempotent: removing an unknown id is a
    /// no-op. No event is delivered to the target after this returns.
    pub fn remove(&self, id: SubscriptionId) -> bool {
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|entry| entry.id != id);
        before != state.entries.len()
    }

    /// Removes a temporary waiter that did not fire (timeout path).
    pub fn remove_waiter(&self, id: SubscriptionId) {
        let mut state = self.state.lock();
        state.waiters.retain(|waiter| waiter.id != id);
    }

    /// Releases one unit of local interest in `kind`.
    ///
    /// Returns `true` when this was the last interest and the caller
    /// should disable remote delivery. Always `false` after close.
    pub fn release_kind(&self, kind: EventKind) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        match state.kind_counts.get_mut(&kind) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                state.kind_counts.remove(&kind);
                true
            }
            None => false,
        }
    }

    /// Increments the interest count; returns `true` on the 0 → 1 edge.
    fn acquire_kind(state: &mut RegistryState, kind: EventKind) -> bool {
        let count = state.kind_counts.entry(kind).or_insert(0);
        *count += 1;
        *count == 1
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Delivers one event to all matching waiters and subscriptions.
    ///
    /// Called exactly once per inbound event by the router. Waiters are
    /// served first and removed on match; subscriptions then receive
    /// the event in registration order. A failing subscriber is
    /// reported and never blocks later subscribers.
    pub fn dispatch(&self, event: &SessionEvent) {
        let kind = event.kind();
        let mut failures: Vec<(SubscriptionId, String)> = Vec::new();

        {
            let mut state = self.state.lock();

            state.waiters.retain_mut(|waiter| {
                if waiter.kind != kind || !(waiter.predicate)(event) {
                    return true;
                }
                if let Some(tx) = waiter.tx.take() {
                    let _ = tx.send(Ok(event.clone()));
                }
                false
            });

            for entry in &state.entries {
                if entry.kind != kind {
                    continue;
                }
                if let Some(scope) = &entry.scope
                    && event.context() != Some(scope)
                {
                    continue;
                }

                match &entry.target {
                    DeliveryTarget::Queue(tx) => {
                        if let Err(e) = tx.try_send(event.clone()) {
                            failures.push((entry.id, format!("queue delivery failed: {e}")));
                        }
                    }
                    DeliveryTarget::Callback(callback) => {
                        if let Err(message) = callback(event) {
                            failures.push((entry.id, message));
                        }
                    }
                }
            }
        }

        // Report outside the state lock so a sink may inspect the registry.
        if !failures.is_empty() {
            let sink = self.error_sink.lock();
            for (id, message) in failures {
                warn!(subscription = %id, %message, "Subscriber delivery failure");
                if let Some(sink) = sink.as_ref() {
                    sink(id, &message);
                }
            }
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Fails every waiter and drops every subscription.
    ///
    /// Each pending waiter receives one error built by `make_error`;
    /// queue receivers observe end-of-stream. Idempotent.
    pub fn close<F>(&self, make_error: F)
    where
        F: Fn() -> Error,
    {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;

        let waiters = std::mem::take(&mut state.waiters);
        let count = waiters.len();
        for mut waiter in waiters {
            if let Some(tx) = waiter.tx.take() {
                let _ = tx.send(Err(make_error()));
            }
        }

        state.entries.clear();
        state.kind_counts.clear();

        if count > 0 {
            debug!(count, "Failed pending event waiters on close");
        }
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Number of durable subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Number of pending temporary waiters.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

// ============================================================================
// SubscriptionHandle
// ============================================================================

/// Handle to one registered event subscription.
///
/// Dropping the handle unsubscribes, mirroring explicit
/// [`unsubscribe`](Self::unsubscribe). For queue-backed subscriptions,
/// [`recv`](Self::recv) pulls events in arrival order.
pub struct SubscriptionHandle {
    id: SubscriptionId,
    kind: EventKind,
    registry: Arc<SubscriptionRegistry>,
    connection: Connection,
    receiver: Option<mpsc::Receiver<SessionEvent>>,
    active: bool,
}

impl SubscriptionHandle {
    /// Creates a handle over a registered subscription.
    pub(crate) fn new(
        id: SubscriptionId,
        kind: EventKind,
        registry: Arc<SubscriptionRegistry>,
        connection: Connection,
        receiver: Option<mpsc::Receiver<SessionEvent>>,
    ) -> Self {
        Self {
            id,
            kind,
            registry,
            connection,
            receiver,
            active: true,
        }
    }

    /// Returns the subscription id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Returns the subscribed event kind.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Receives the next event.
    ///
    /// Returns `None` once the subscription is unsubscribed, the session
    /// is closed, or for callback-backed subscriptions.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        match self.receiver.as_mut() {
            Some(receiver) => receiver.recv().await,
            None => None,
        }
    }

    /// Unsubscribes. Idempotent; no events are delivered to this handle
    /// after it returns. The remote unsubscription for the last local
    /// subscriber of a kind is issued in the background.
    pub fn unsubscribe(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.receiver = None;

        self.registry.remove(self.id);
        if self.registry.release_kind(self.kind) {
            spawn_remote_unsubscribe(self.connection.clone(), self.kind);
        }
        debug!(subscription = %self.id, kind = ?self.kind, "Unsubscribed");
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("active", &self.active)
            .finish()
    }
}

/// Sends `session.unsubscribe` without blocking the caller.
///
/// Best effort: the local subscription is already gone, so a failure
/// only means the remote keeps emitting events nobody consumes.
pub(crate) fn spawn_remote_unsubscribe(connection: Connection, kind: EventKind) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        return;
    };
    runtime.spawn(async move {
        let request = CommandRequest::new(Command::Session(SessionCommand::Unsubscribe {
            events: vec![kind.method().to_string()],
        }));
        if let Err(e) = connection.send(request).await {
            debug!(error = %e, ?kind, "Remote unsubscribe failed");
        }
    });
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ConsoleLogEntry, LogLevel};

    fn console_event(context: Option<&str>, text: &str) -> SessionEvent {
        SessionEvent::ConsoleEntry(ConsoleLogEntry {
            level: LogLevel::Info,
            method: "log".to_string(),
            text: text.to_string(),
            context: context.map(ContextId::new),
            timestamp: 0,
        })
    }

    #[tokio::test]
    async fn test_queue_subscription_receives_in_order() {
        let registry = SubscriptionRegistry::new();
        let (_id, mut rx, first) = registry
            .add_queue(EventKind::ConsoleEntry, None, 8)
            .expect("subscribe");
        assert!(first);

        registry.dispatch(&console_event(None, "one"));
        registry.dispatch(&console_event(None, "two"));

        let SessionEvent::ConsoleEntry(a) = rx.recv().await.expect("event") else {
            panic!("unexpected kind");
        };
        let SessionEvent::ConsoleEntry(b) = rx.recv().await.expect("event") else {
            panic!("unexpected kind");
        };
        assert_eq!(a.text, "one");
        assert_eq!(b.text, "two");
    }

    #[tokio::test]
    async fn test_scope_filtering() {
        let registry = SubscriptionRegistry::new();
        let (_id, mut rx, _) = registry
            .add_queue(EventKind::ConsoleEntry, Some(ContextId::new("ctx-a")), 8)
            .expect("subscribe");

        registry.dispatch(&console_event(Some("ctx-b"), "other"));
        registry.dispatch(&console_event(None, "no context"));
        registry.dispatch(&console_event(Some("ctx-a"), "mine"));

        let SessionEvent::ConsoleEntry(entry) = rx.recv().await.expect("event") else {
            panic!("unexpected kind");
        };
        assert_eq!(entry.text, "mine");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_removed_subscription_gets_nothing() {
        let registry = SubscriptionRegistry::new();
        let (id, mut rx, _) = registry
            .add_queue(EventKind::ConsoleEntry, None, 8)
            .expect("subscribe");

        registry.dispatch(&console_event(None, "before"));
        assert!(registry.remove(id));
        registry.dispatch(&console_event(None, "after"));

        assert!(rx.recv().await.is_some());
        // The sender side is gone; only the pre-removal event exists.
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.subscription_count(), 0);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        let (id, _rx, _) = registry
            .add_queue(EventKind::ConsoleEntry, None, 8)
            .expect("subscribe");

        assert!(registry.remove(id));
        assert!(!registry.remove(id));
    }

    #[test]
    fn test_callback_failure_does_not_block_later_subscribers() {
        let registry = SubscriptionRegistry::new();
        let (_bad, _) = registry
            .add_callback(
                EventKind::ConsoleEntry,
                None,
                Box::new(|_| Err("subscriber exploded".to_string())),
            )
            .expect("subscribe");

        let received = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let received_clone = Arc::clone(&received);
        let (_good, _) = registry
            .add_callback(
                EventKind::ConsoleEntry,
                None,
                Box::new(move |_| {
                    received_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(())
                }),
            )
            .expect("subscribe");

        let sink_hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let sink_hits_clone = Arc::clone(&sink_hits);
        registry.set_error_sink(Box::new(move |_, _| {
            sink_hits_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }));

        registry.dispatch(&console_event(None, "boom"));

        assert_eq!(received.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(sink_hits.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_waiter_fires_once_and_is_removed() {
        let registry = SubscriptionRegistry::new();
        let (_id, rx, first) = registry
            .add_waiter(EventKind::ConsoleEntry, |event| {
                matches!(
                    event,
                    SessionEvent::ConsoleEntry(entry) if entry.text.contains("match")
                )
            })
            .expect("waiter");
        assert!(first);
        assert_eq!(registry.waiter_count(), 1);

        registry.dispatch(&console_event(None, "no"));
        assert_eq!(registry.waiter_count(), 1);

        registry.dispatch(&console_event(None, "a match"));
        assert_eq!(registry.waiter_count(), 0);

        let event = rx.await.expect("delivered").expect("ok");
        assert!(matches!(event, SessionEvent::ConsoleEntry(_)));
    }

    #[test]
    fn test_kind_refcounting_edges() {
        let registry = SubscriptionRegistry::new();
        let (a, _rx_a, first_a) = registry
            .add_queue(EventKind::RequestSent, None, 8)
            .expect("subscribe");
        let (b, _rx_b, first_b) = registry
            .add_queue(EventKind::RequestSent, None, 8)
            .expect("subscribe");

        assert!(first_a);
        assert!(!first_b);

        registry.remove(a);
        assert!(!registry.release_kind(EventKind::RequestSent));
        registry.remove(b);
        assert!(registry.release_kind(EventKind::RequestSent));
    }

    #[tokio::test]
    async fn test_close_fails_waiters_and_clears_entries() {
        let registry = SubscriptionRegistry::new();
        let (_id, rx, _) = registry
            .add_waiter(EventKind::ConsoleEntry, |_| true)
            .expect("waiter");
        let (_sub, mut queue_rx, _) = registry
            .add_queue(EventKind::ConsoleEntry, None, 8)
            .expect("subscribe");

        registry.close(|| Error::SessionClosed);

        let err = rx.await.expect("delivered").unwrap_err();
        assert!(matches!(err, Error::SessionClosed));
        assert!(queue_rx.recv().await.is_none());
        assert_eq!(registry.subscription_count(), 0);

        // Registration after close is rejected.
        assert!(registry.add_queue(EventKind::ConsoleEntry, None, 8).is_err());
    }
}
