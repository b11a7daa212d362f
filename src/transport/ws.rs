//! WebSocket transport.
//!
//! Wraps a `tokio-tungstenite` client connection. A reader task
//! forwards text frames to the inbound channel in arrival order and
//! drops the sender on stream end, which the connection loop observes
//! as a disconnect.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

use super::Transport;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

// ============================================================================
// WsTransport
// ============================================================================

/// Transport over a WebSocket client connection.
pub struct WsTransport {
    sink: Mutex<WsSink>,
}

impl WsTransport {
    /// Connects to a WebSocket endpoint.
    ///
    /// Returns the transport and the inbound frame stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WebSocket`] when the connection or handshake
    /// fails.
    pub async fn connect(url: &str) -> Result<(Self, mpsc::UnboundedReceiver<String>)> {
        debug!(url, "Connecting WebSocket transport");
        let (stream, _response) = connect_async(url).await?;
        let (sink, mut reader) = stream.split();

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if tx.send(text.to_string()).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("WebSocket closed by remote end");
                        break;
                    }
                    Ok(Message::Ping(_) | Message::Pong(_)) => {
                        trace!("WebSocket keepalive frame");
                    }
                    Ok(other) => {
                        trace!(?other, "Ignoring non-text WebSocket frame");
                    }
                    Err(e) => {
                        warn!(error = %e, "WebSocket read failed");
                        break;
                    }
                }
            }
            // Dropping `tx` here signals the disconnect.
        });

        Ok((
            Self {
                sink: Mutex::new(sink),
            },
            rx,
        ))
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&self, frame: String) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(frame.into()))
            .await
            .map_err(Error::from)
    }

    async fn close(&self) -> Result<()> {
        let mut sink = self.sink.lock().await;
        match sink.send(Message::Close(None)).await {
            Ok(()) => Ok(()),
            // Already closed counts as closed.
            Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed)
            | Err(tokio_tungstenite::tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(Error::from(e)),
        }
    }
}
