//! Session lifecycle, event subscription and bounded waits.
//!
//! A [`Session`] owns one connection to a remote end. It is a cheap
//! clone handle over shared state; clones address the same session.
//!
//! # Lifecycle
//!
//! | Stage | Operation |
//! |-------|-----------|
//! | Open | [`Session::connect`] / [`Session::open`] (`session.new` handshake) |
//! | Use | subscriptions, waits, contexts, overrides |
//! | Close | [`Session::close`] (`session.end`, then teardown) |
//!
//! Close is idempotent. After it, every operation fails with
//! [`Error::SessionClosed`] and every in-flight wait has been failed
//! exactly once.
//!
//! # Remote subscription management
//!
//! The remote end only emits events somebody asked for. The session
//! sends `session.subscribe` when the first local consumer of an event
//! kind appears and `session.unsubscribe` when the last one goes away,
//! so overlapping consumers share one remote subscription.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::events::correlation::{CorrelationTable, RequestPhase, RequestRecord, WaitOutcome};
use crate::events::registry::{
    ErrorSink, EventCallback, SubscriptionHandle, SubscriptionRegistry, spawn_remote_unsubscribe,
};
use crate::events::router::EventRouter;
use crate::identifiers::{ContextId, RequestId, SessionId, SubscriptionId};
use crate::protocol::{
    BrowsingContextCommand, Command, CommandRequest, CreateContextKind, EventKind,
    GeolocationCoordinates, PermissionState, SessionCommand, SessionEvent,
};
use crate::transport::{Connection, Transport, WsTransport};

use super::context::BrowsingContext;

// ============================================================================
// SessionInner
// ============================================================================

pub(crate) struct SessionInner {
    pub(crate) session_id: SessionId,
    pub(crate) connection: Connection,
    pub(crate) registry: Arc<SubscriptionRegistry>,
    pub(crate) correlation: Arc<CorrelationTable>,
    pub(crate) config: SessionConfig,
    pub(crate) closed: AtomicBool,
    /// Open contexts created through this session.
    pub(crate) contexts: Mutex<Vec<ContextId>>,
    /// Active geolocation overrides per context.
    pub(crate) geolocation: Mutex<FxHashMap<ContextId, GeolocationCoordinates>>,
    /// Applied permission grants keyed by (origin, permission name).
    pub(crate) permissions: Mutex<FxHashMap<(String, String), PermissionState>>,
}

// ============================================================================
// Session
// ============================================================================

/// A live BiDi session.
///
/// Cloning is cheap and yields another handle to the same session.
#[derive(Clone)]
pub struct Session {
    pub(crate) inner: Arc<SessionInner>,
}

impl Session {
    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Connects over WebSocket and performs the `session.new` handshake.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WebSocket`] when the connection fails and
    /// [`Error::HandshakeTimeout`] when the remote end does not answer
    /// `session.new` within [`SessionConfig::handshake_timeout`].
    pub async fn connect(url: &str, capabilities: Value, config: SessionConfig) -> Result<Self> {
        let (transport, inbound) = WsTransport::connect(url).await?;
        Self::open(Arc::new(transport), inbound, capabilities, config).await
    }

    /// Opens a session over an established transport.
    ///
    /// The transport is torn down when the handshake fails; a session
    /// either exists fully or not at all.
    pub async fn open(
        transport: Arc<dyn Transport>,
        inbound: mpsc::UnboundedReceiver<String>,
        capabilities: Value,
        config: SessionConfig,
    ) -> Result<Self> {
        let registry = Arc::new(SubscriptionRegistry::new());
        let correlation = Arc::new(CorrelationTable::new(
            config.request_retention,
            config.max_request_records,
        ));
        let router = Arc::new(EventRouter::new(
            Arc::clone(&registry),
            Arc::clone(&correlation),
        ));
        let connection = Connection::start(transport, inbound, router, &config);

        let request = CommandRequest::new(Command::Session(SessionCommand::New { capabilities }));
        let result = match connection
            .send_with_timeout(request, config.handshake_timeout)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                connection.shutdown();
                return Err(match e {
                    Error::CommandTimeout { timeout_ms, .. } => {
                        Error::handshake_timeout(timeout_ms)
                    }
                    other => other,
                });
            }
        };

        let Some(session_id) = result.get("sessionId").and_then(|v| v.as_str()) else {
            connection.shutdown();
            return Err(Error::protocol(
                "invalid response",
                "session.new result carries no sessionId",
            ));
        };
        let session_id = SessionId::new(session_id);
        info!(session = %session_id, "Session established");

        Ok(Self {
            inner: Arc::new(SessionInner {
                session_id,
                connection,
                registry,
                correlation,
                config,
                closed: AtomicBool::new(false),
                contexts: Mutex::new(Vec::new()),
                geolocation: Mutex::new(FxHashMap::default()),
                permissions: Mutex::new(FxHashMap::default()),
            }),
        })
    }

    /// Ends the session.
    ///
    /// Best effort and idempotent: `session.end` is attempted, then the
    /// connection is torn down regardless. Every pending command and
    /// waiter fails exactly once; later calls return immediately.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!(session = %self.inner.session_id, "Closing session");

        let request = CommandRequest::new(Command::Session(SessionCommand::End {}));
        if let Err(e) = self.inner.connection.send(request).await {
            debug!(error = %e, "session.end failed during close");
        }
        self.inner.connection.shutdown();
        Ok(())
    }

    /// Returns the remote-assigned session id.
    #[inline]
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.inner.session_id
    }

    /// Returns `true` once [`close`](Self::close) has begun.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        Ok(())
    }

    // ========================================================================
    // Contexts
    // ========================================================================

    /// Creates a browsing context.
    pub async fn create_context(&self, kind: CreateContextKind) -> Result<BrowsingContext> {
        self.ensure_open()?;
        let request = CommandRequest::new(Command::BrowsingContext(
            BrowsingContextCommand::Create { kind },
        ));
        let result = self.inner.connection.send(request).await?;

        let Some(id) = result.get("context").and_then(|v| v.as_str()) else {
            return Err(Error::protocol(
                "invalid response",
                "browsingContext.create result carries no context",
            ));
        };
        let id = ContextId::new(id);
        self.inner.contexts.lock().push(id.clone());
        debug!(context = %id, "Context created");

        Ok(BrowsingContext::new(id, self))
    }

    /// Returns the contexts created through this session, oldest first.
    #[must_use]
    pub fn contexts(&self) -> Vec<ContextId> {
        self.inner.contexts.lock().clone()
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Subscribes to an event kind, optionally scoped to one context.
    ///
    /// Events arrive on the handle in wire order; an event emitted by
    /// the remote end after the subscribe command resolves is never
    /// missed. Dropping the handle unsubscribes.
    pub async fn subscribe(
        &self,
        kind: EventKind,
        scope: Option<ContextId>,
    ) -> Result<SubscriptionHandle> {
        self.ensure_open()?;
        let (id, rx, first) =
            self.inner
                .registry
                .add_queue(kind, scope, self.inner.config.event_queue_capacity)?;
        self.enable_remote(kind, first, id).await?;

        Ok(SubscriptionHandle::new(
            id,
            kind,
            Arc::clone(&self.inner.registry),
            self.inner.connection.clone(),
            Some(rx),
        ))
    }

    /// Subscribes with a callback invoked inline on delivery.
    ///
    /// A callback error is routed to the error sink and never affects
    /// other subscribers. The callback must not call back into the
    /// session.
    pub async fn subscribe_with_callback(
        &self,
        kind: EventKind,
        scope: Option<ContextId>,
        callback: EventCallback,
    ) -> Result<SubscriptionHandle> {
        self.ensure_open()?;
        let (id, first) = self.inner.registry.add_callback(kind, scope, callback)?;
        self.enable_remote(kind, first, id).await?;

        Ok(SubscriptionHandle::new(
            id,
            kind,
            Arc::clone(&self.inner.registry),
            self.inner.connection.clone(),
            None,
        ))
    }

    /// Installs the sink receiving subscriber delivery failures.
    pub fn set_error_sink(&self, sink: ErrorSink) {
        self.inner.registry.set_error_sink(sink);
    }

    /// Sends `session.subscribe` on the first local interest, rolling
    /// the registration back when the remote end rejects it.
    async fn enable_remote(
        &self,
        kind: EventKind,
        first: bool,
        id: SubscriptionId,
    ) -> Result<()> {
        if !first {
            return Ok(());
        }
        if let Err(e) = self.remote_subscribe(kind).await {
            self.inner.registry.remove(id);
            self.inner.registry.release_kind(kind);
            return Err(e);
        }
        Ok(())
    }

    async fn remote_subscribe(&self, kind: EventKind) -> Result<()> {
        let request = CommandRequest::new(Command::Session(SessionCommand::Subscribe {
            events: vec![kind.method().to_string()],
        }));
        self.inner.connection.send(request).await?;
        debug!(?kind, "Remote subscription enabled");
        Ok(())
    }

    // ========================================================================
    // Bounded Waits
    // ========================================================================

    /// Awaits the first event of `kind` matching `predicate`.
    ///
    /// The waiter is registered before remote delivery is enabled, so
    /// the matching event cannot slip through in between. On timeout
    /// the waiter is removed and [`Error::Timeout`] is returned; the
    /// remote end is not told to stop anything.
    pub async fn await_first<P>(
        &self,
        kind: EventKind,
        predicate: P,
        timeout: Duration,
    ) -> Result<SessionEvent>
    where
        P: Fn(&SessionEvent) -> bool + Send + Sync + 'static,
    {
        self.ensure_open()?;
        let (id, rx, first) = self.inner.registry.add_waiter(kind, predicate)?;
        if first && let Err(e) = self.remote_subscribe(kind).await {
            self.inner.registry.remove_waiter(id);
            self.inner.registry.release_kind(kind);
            return Err(e);
        }

        let result = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resolved)) => resolved,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                self.inner.registry.remove_waiter(id);
                Err(Error::timeout(
                    format!("await_first {}", kind.method()),
                    timeout.as_millis() as u64,
                ))
            }
        };

        if self.inner.registry.release_kind(kind) {
            spawn_remote_unsubscribe(self.inner.connection.clone(), kind);
        }
        result
    }

    /// Awaits a lifecycle phase of the request identified by `id`.
    ///
    /// Resolves immediately when the exact phase was already observed;
    /// a request that skipped the phase never resolves the wait. Remote
    /// delivery of the phase's event is held open for the duration of
    /// the wait.
    pub async fn await_request_phase(
        &self,
        id: &RequestId,
        phase: RequestPhase,
        timeout: Duration,
    ) -> Result<RequestRecord> {
        self.ensure_open()?;
        let kind = phase.event_kind();
        let first = self.inner.registry.acquire_interest(kind)?;
        if first && let Err(e) = self.remote_subscribe(kind).await {
            self.inner.registry.release_kind(kind);
            return Err(e);
        }

        let result = match self.inner.correlation.begin_wait(id, phase) {
            Ok(WaitOutcome::Ready(record)) => Ok(record),
            Ok(WaitOutcome::Pending(waiter_id, rx)) => {
                match tokio::time::timeout(timeout, rx).await {
                    Ok(Ok(resolved)) => resolved,
                    Ok(Err(_)) => Err(Error::ConnectionClosed),
                    Err(_) => {
                        self.inner.correlation.cancel_wait(id, waiter_id);
                        Err(Error::timeout(
                            format!("await_request_phase {id} {phase:?}"),
                            timeout.as_millis() as u64,
                        ))
                    }
                }
            }
            Err(e) => Err(e),
        };

        if self.inner.registry.release_kind(kind) {
            spawn_remote_unsubscribe(self.inner.connection.clone(), kind);
        }
        result
    }

    /// Returns a snapshot of the record for a request id, if retained.
    #[must_use]
    pub fn request_record(&self, id: &RequestId) -> Option<RequestRecord> {
        self.inner.correlation.get(id)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.inner.session_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// Session intentionally has no Drop teardown: clones share the inner
// state, and the connection loop ends when the transport does. Call
// `close` for an orderly `session.end`.
