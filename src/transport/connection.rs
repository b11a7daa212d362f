//! Connection event loop and command correlation.
//!
//! One task per connection owns the transport and multiplexes two
//! sources with `tokio::select!`:
//!
//! - inbound frames from the transport (responses and events)
//! - outbound commands from [`Connection`] handles
//!
//! Responses resolve pending commands through a correlation map keyed
//! by [`CommandId`]; events flow to the [`EventRouter`]. Because one
//! loop processes both sources sequentially, every frame is handled in
//! arrival order and an event can never overtake the response that
//! preceded it on the wire.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::events::router::{EventRouter, ShutdownReason};
use crate::identifiers::CommandId;
use crate::protocol::{CommandRequest, IncomingMessage};

use super::Transport;

// ============================================================================
// Types
// ============================================================================

/// Pending command waiters keyed by command id.
type PendingMap = FxHashMap<CommandId, oneshot::Sender<Result<Value>>>;

/// Instruction to the connection loop.
enum LoopCommand {
    /// Send a serialized command frame.
    Send { id: CommandId, frame: String },
    /// Close the transport and end the loop.
    Shutdown,
}

// ============================================================================
// Connection
// ============================================================================

/// Cloneable handle to a running connection loop.
///
/// Sending a command registers a pending waiter, enqueues the frame,
/// and awaits the correlated response under a timeout.
#[derive(Clone)]
pub(crate) struct Connection {
    command_tx: mpsc::UnboundedSender<LoopCommand>,
    pending: Arc<Mutex<PendingMap>>,
    command_timeout: Duration,
    max_pending: usize,
}

impl Connection {
    /// Starts the connection loop over `transport` and returns a handle.
    pub fn start(
        transport: Arc<dyn Transport>,
        inbound: mpsc::UnboundedReceiver<String>,
        router: Arc<EventRouter>,
        config: &SessionConfig,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let pending: Arc<Mutex<PendingMap>> = Arc::new(Mutex::new(FxHashMap::default()));

        tokio::spawn(run_loop(
            transport,
            inbound,
            command_rx,
            Arc::clone(&pending),
            router,
        ));

        Self {
            command_tx,
            pending,
            command_timeout: config.command_timeout,
            max_pending: config.max_pending_commands,
        }
    }

    /// Sends a command and awaits its response under the default timeout.
    pub async fn send(&self, request: CommandRequest) -> Result<Value> {
        self.send_with_timeout(request, self.command_timeout).await
    }

    /// Sends a command and awaits its response under `timeout`.
    ///
    /// On timeout the pending waiter is removed and the caller gets
    /// [`Error::CommandTimeout`]; the command itself is not cancelled
    /// on the remote end, and a late response is quietly dropped.
    pub async fn send_with_timeout(
        &self,
        request: CommandRequest,
        timeout: Duration,
    ) -> Result<Value> {
        let id = request.id;
        let frame = serde_json::to_string(&request)?;
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self.pending.lock();
            if pending.len() >= self.max_pending {
                return Err(Error::PendingLimit {
                    pending: pending.len(),
                    max: self.max_pending,
                });
            }
            pending.insert(id, tx);
        }

        if self.command_tx.send(LoopCommand::Send { id, frame }).is_err() {
            self.pending.lock().remove(&id);
            return Err(Error::ConnectionClosed);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            // The loop dropped the waiter without resolving it.
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(Error::command_timeout(id, timeout.as_millis() as u64))
            }
        }
    }

    /// Asks the loop to close the transport and end. Idempotent;
    /// already-stopped loops ignore the request.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(LoopCommand::Shutdown);
    }

    /// Number of commands awaiting responses.
    #[cfg(test)]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

// ============================================================================
// Event Loop
// ============================================================================

async fn run_loop(
    transport: Arc<dyn Transport>,
    mut inbound: mpsc::UnboundedReceiver<String>,
    mut commands: mpsc::UnboundedReceiver<LoopCommand>,
    pending: Arc<Mutex<PendingMap>>,
    router: Arc<EventRouter>,
) {
    loop {
        tokio::select! {
            frame = inbound.recv() => match frame {
                Some(text) => handle_frame(&text, &pending, &router),
                None => {
                    debug!("Transport stream ended");
                    // Refuse further sends first: a command enqueued after
                    // the drain below would otherwise wait out its timeout.
                    commands.close();
                    fail_pending(&pending, || Error::ConnectionClosed);
                    router.shutdown(ShutdownReason::Transport);
                    break;
                }
            },
            command = commands.recv() => match command {
                Some(LoopCommand::Send { id, frame }) => {
                    if let Err(e) = transport.send(frame).await {
                        warn!(error = %e, "Transport send failed");
                        commands.close();
                        fail_pending(&pending, || Error::transport(e.to_string()));
                        router.shutdown(ShutdownReason::Transport);
                        break;
                    }
                    trace!(command = %id, "Command frame sent");
                }
                Some(LoopCommand::Shutdown) | None => {
                    commands.close();
                    if let Err(e) = transport.close().await {
                        debug!(error = %e, "Transport close failed");
                    }
                    fail_pending(&pending, || Error::SessionClosed);
                    router.shutdown(ShutdownReason::Closed);
                    break;
                }
            },
        }
    }
    debug!("Connection loop ended");
}

/// Classifies one inbound frame and routes it.
fn handle_frame(text: &str, pending: &Mutex<PendingMap>, router: &EventRouter) {
    match IncomingMessage::parse(text) {
        Ok(IncomingMessage::Response(response)) => {
            let waiter = pending.lock().remove(&response.id);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(response.into_result());
                }
                // Response after its waiter timed out.
                None => trace!(command = %response.id, "Dropping unclaimed response"),
            }
        }
        Ok(IncomingMessage::Event(event)) => router.dispatch(&event),
        Err(e) => warn!(error = %e, "Dropping unparseable frame"),
    }
}

/// Fails every pending command exactly once.
fn fail_pending<F>(pending: &Mutex<PendingMap>, make_error: F)
where
    F: Fn() -> Error,
{
    let drained: Vec<_> = {
        let mut map = pending.lock();
        map.drain().collect()
    };
    if !drained.is_empty() {
        debug!(count = drained.len(), "Failing pending commands");
    }
    for (_, tx) in drained {
        let _ = tx.send(Err(make_error()));
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

    use crate::events::correlation::CorrelationTable;
    use crate::events::registry::SubscriptionRegistry;
    use crate::protocol::{Command, EventKind, SessionCommand, SessionEvent};
    use crate::transport::ChannelTransport;

    fn harness(
        config: &SessionConfig,
    ) -> (Connection, crate::transport::ChannelPeer, Arc<SubscriptionRegistry>) {
        let (transport, inbound, peer) = ChannelTransport::pair();
        let registry = Arc::new(SubscriptionRegistry::new());
        let correlation = Arc::new(CorrelationTable::new(
            config.request_retention,
            config.max_request_records,
        ));
        let router = Arc::new(EventRouter::new(Arc::clone(&registry), correlation));
        let connection = Connection::start(Arc::new(transport), inbound, router, config);
        (connection, peer, registry)
    }

    fn subscribe_command() -> CommandRequest {
        CommandRequest::new(Command::Session(SessionCommand::Subscribe {
            events: vec!["log.entryAdded".to_string()],
        }))
    }

    #[tokio::test]
    async fn test_command_resolves_with_result() {
        let config = SessionConfig::default();
        let (connection, mut peer, _) = harness(&config);

        let responder = tokio::spawn(async move {
            let command = peer.next_command().await.expect("command");
            assert_eq!(command["method"], "session.subscribe");
            let id = CommandId::from_value(command["id"].as_u64().expect("id"));
            peer.respond_success(id, json!({"subscription": "s-1"}));
            peer
        });

        let result = connection.send(subscribe_command()).await.expect("response");
        assert_eq!(result["subscription"], "s-1");
        assert_eq!(connection.pending_count(), 0);
        responder.await.expect("responder");
    }

    #[tokio::test]
    async fn test_protocol_rejection_is_local_to_command() {
        let config = SessionConfig::default();
        let (connection, mut peer, _) = harness(&config);

        let responder = tokio::spawn(async move {
            let command = peer.next_command().await.expect("command");
            let id = CommandId::from_value(command["id"].as_u64().expect("id"));
            peer.respond_error(id, "invalid argument", "unknown event");
            peer
        });

        let err = connection.send(subscribe_command()).await.unwrap_err();
        assert!(err.is_protocol_error());
        responder.await.expect("responder");

        // The connection survives a rejection.
        assert_eq!(connection.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_command_timeout_removes_waiter() {
        let config = SessionConfig::default();
        let (connection, mut peer, _) = harness(&config);

        let err = connection
            .send_with_timeout(subscribe_command(), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommandTimeout { .. }));
        assert_eq!(connection.pending_count(), 0);

        // A late response is dropped without disturbing the loop.
        let command = peer.next_command().await.expect("command");
        let id = CommandId::from_value(command["id"].as_u64().expect("id"));
        peer.respond_success(id, json!({}));

        // The loop is still serving new commands.
        let responder = tokio::spawn(async move {
            let command = peer.next_command().await.expect("command");
            let id = CommandId::from_value(command["id"].as_u64().expect("id"));
            peer.respond_success(id, json!({"ok": true}));
        });
        let result = connection.send(subscribe_command()).await.expect("response");
        assert_eq!(result["ok"], true);
        responder.await.expect("responder");
    }

    #[tokio::test]
    async fn test_disconnect_fails_all_pending_once() {
        let config = SessionConfig::default();
        let (connection, mut peer, registry) = harness(&config);
        let (_id, waiter_rx, _) = registry
            .add_waiter(EventKind::ConsoleEntry, |_| true)
            .expect("waiter");

        let joined = {
            let a = connection.clone();
            let b = connection.clone();
            tokio::spawn(async move {
                tokio::join!(a.send(subscribe_command()), b.send(subscribe_command()))
            })
        };

        // Let both commands reach the peer, then cut the line.
        peer.next_command().await.expect("command");
        peer.next_command().await.expect("command");
        peer.disconnect();

        let (a, b) = joined.await.expect("join");
        assert!(matches!(a.unwrap_err(), Error::ConnectionClosed));
        assert!(matches!(b.unwrap_err(), Error::ConnectionClosed));

        // Event waiters observe the transport failure too.
        assert!(matches!(
            waiter_rx.await.expect("resolved"),
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_fails_pending_with_session_closed() {
        let config = SessionConfig::default();
        let (connection, mut peer, _) = harness(&config);

        let pending = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.send(subscribe_command()).await })
        };
        peer.next_command().await.expect("command");

        connection.shutdown();
        connection.shutdown();

        let err = pending.await.expect("join").unwrap_err();
        assert!(matches!(err, Error::SessionClosed));

        // The loop is gone; new sends fail fast.
        let err = connection.send(subscribe_command()).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_pending_limit_rejects_without_sending() {
        let config = SessionConfig::default().max_pending_commands(1);
        let (connection, mut peer, _) = harness(&config);

        let held = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.send(subscribe_command()).await })
        };
        let first = peer.next_command().await.expect("command");

        // Wait until the first command occupies the only pending slot.
        while connection.pending_count() == 0 {
            tokio::task::yield_now().await;
        }
        let err = connection.send(subscribe_command()).await.unwrap_err();
        assert!(matches!(err, Error::PendingLimit { pending: 1, max: 1 }));

        let id = CommandId::from_value(first["id"].as_u64().expect("id"));
        peer.respond_success(id, json!({}));
        held.await.expect("join").expect("response");
    }

    #[tokio::test]
    async fn test_events_and_responses_keep_wire_order() {
        let config = SessionConfig::default();
        let (connection, mut peer, registry) = harness(&config);
        let (_id, mut events, _) = registry
            .add_queue(EventKind::ConsoleEntry, None, 8)
            .expect("subscribe");

        let responder = tokio::spawn(async move {
            let command = peer.next_command().await.expect("command");
            let id = CommandId::from_value(command["id"].as_u64().expect("id"));
            // Event first, then the response: the subscriber must see
            // the event before the command resolves.
            peer.send_event(
                "log.entryAdded",
                json!({ "level": "info", "text": "first", "timestamp": 1 }),
            );
            peer.respond_success(id, json!({}));
        });

        connection.send(subscribe_command()).await.expect("response");
        responder.await.expect("responder");

        let event = events.recv().await.expect("event");
        let SessionEvent::ConsoleEntry(entry) = event else {
            panic!("unexpected kind");
        };
        assert_eq!(entry.text, "first");
    }

    #[tokio::test]
    async fn test_malformed_frame_does_not_kill_loop() {
        let config = SessionConfig::default();
        let (connection, mut peer, _) = harness(&config);

        peer.send_raw("{this is not json");

        let responder = tokio::spawn(async move {
            let command = peer.next_command().await.expect("command");
            let id = CommandId::from_value(command["id"].as_u64().expect("id"));
            peer.respond_success(id, json!({}));
        });
        connection.send(subscribe_command()).await.expect("response");
        responder.await.expect("responder");
    }
}
