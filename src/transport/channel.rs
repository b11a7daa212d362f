//! In-process transport over unbounded channels.
//!
//! [`ChannelTransport::pair`] wires a transport to a [`ChannelPeer`]
//! playing the remote end. Tests drive the peer directly: pull the
//! next command, answer it, emit events, or drop the line.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::identifiers::CommandId;

use super::Transport;

// ============================================================================
// ChannelTransport
// ============================================================================

/// Transport backed by in-process channels.
pub struct ChannelTransport {
    /// Frames toward the peer. `None` once closed.
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl ChannelTransport {
    /// Creates a connected transport/peer pair.
    ///
    /// Returns the transport, the inbound frame stream for the
    /// connection loop, and the peer handle.
    #[must_use]
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<String>, ChannelPeer) {
        let (to_peer_tx, to_peer_rx) = mpsc::unbounded_channel();
        let (to_local_tx, to_local_rx) = mpsc::unbounded_channel();

        let transport = Self {
            outbound: Mutex::new(Some(to_peer_tx)),
        };
        let peer = ChannelPeer {
            commands: to_peer_rx,
            local: Some(to_local_tx),
        };
        (transport, to_local_rx, peer)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, frame: String) -> Result<()> {
        let outbound = self.outbound.lock();
        match outbound.as_ref() {
            Some(tx) => tx
                .send(frame)
                .map_err(|_| Error::transport("channel peer dropped")),
            None => Err(Error::ConnectionClosed),
        }
    }

    async fn close(&self) -> Result<()> {
        self.outbound.lock().take();
        Ok(())
    }
}

// ============================================================================
// ChannelPeer
// ============================================================================

/// The remote end of a [`ChannelTransport`].
///
/// Responses and events are injected as raw frames, exactly as a
/// browser would emit them.
pub struct ChannelPeer {
    commands: mpsc::UnboundedReceiver<String>,
    local: Option<mpsc::UnboundedSender<String>>,
}

impl ChannelPeer {
    /// Receives the next command sent by the local end.
    ///
    /// Returns `None` once the transport is closed.
    pub async fn next_command(&mut self) -> Option<Value> {
        let frame = self.commands.recv().await?;
        serde_json::from_str(&frame).ok()
    }

    /// Returns an already-arrived command without waiting.
    pub fn try_next_command(&mut self) -> Option<Value> {
        let frame = self.commands.try_recv().ok()?;
        serde_json::from_str(&frame).ok()
    }

    /// Answers a command with a success result.
    pub fn respond_success(&self, id: CommandId, result: Value) {
        self.inject(json!({
            "type": "success",
            "id": id.value(),
            "result": result,
        }));
    }

    /// Answers a command with a protocol error.
    pub fn respond_error(&self, id: CommandId, code: &str, message: &str) {
        self.inject(json!({
            "type": "error",
            "id": id.value(),
            "error": code,
            "message": message,
        }));
    }

    /// Emits an unsolicited event.
    pub fn send_event(&self, method: &str, params: Value) {
        self.inject(json!({
            "type": "event",
            "method": method,
            "params": params,
        }));
    }

    /// Emits a raw frame, bypassing any JSON shaping.
    pub fn send_raw(&self, frame: impl Into<String>) {
        if let Some(tx) = self.local.as_ref() {
            let _ = tx.send(frame.into());
        }
    }

    /// Drops the line toward the local end, simulating a disconnect.
    pub fn disconnect(&mut self) {
        self.local.take();
    }

    fn inject(&self, value: Value) {
        if let Some(tx) = self.local.as_ref() {
            let _ = tx.send(value.to_string());
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_reach_peer_in_order() {
        let (transport, _inbound, mut peer) = ChannelTransport::pair();

        transport
            .send(r#"{"id":1,"method":"session.new","params":{}}"#.to_string())
            .await
            .expect("send");
        transport
            .send(r#"{"id":2,"method":"session.end","params":{}}"#.to_string())
            .await
            .expect("send");

        let first = peer.next_command().await.expect("command");
        let second = peer.next_command().await.expect("command");
        assert_eq!(first["id"], 1);
        assert_eq!(second["id"], 2);
    }

    #[tokio::test]
    async fn test_peer_responses_arrive_locally() {
        let (_transport, mut inbound, peer) = ChannelTransport::pair();

        peer.respond_success(CommandId::from_value(7), json!({"ok": true}));
        peer.send_event("log.entryAdded", json!({"level": "info"}));

        let first = inbound.recv().await.expect("frame");
        assert!(first.contains(r#""id":7"#));
        let second = inbound.recv().await.expect("frame");
        assert!(second.contains("log.entryAdded"));
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (transport, _inbound, _peer) = ChannelTransport::pair();
        transport.close().await.expect("close");

        let err = transport.send("{}".to_string()).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_disconnect_ends_inbound_stream() {
        let (_transport, mut inbound, mut peer) = ChannelTransport::pair();
        peer.disconnect();
        assert!(inbound.recv().await.is_none());
    }
}
