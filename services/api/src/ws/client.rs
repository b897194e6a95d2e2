//! The browser side of a session: typed send/receive over the client WebSocket.

use super::{
    errors::SessionError,
    protocol::{ClientMessage, ServerMessage},
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::sync::Mutex;
use tracing::debug;

/// Outbound half of the client connection. Shared by every task of a session.
#[async_trait]
pub trait ClientSink: Send + Sync {
    async fn send(&self, msg: ServerMessage) -> Result<()>;
}

/// Inbound half of the client connection. `Ok(None)` means the client disconnected.
#[async_trait]
pub trait ClientSource: Send {
    async fn recv(&mut self) -> Result<Option<ClientMessage>>;
}

pub struct WsClientSink {
    socket_tx: Mutex<SplitSink<WebSocket, Message>>,
}

pub struct WsClientSource {
    socket_rx: SplitStream<WebSocket>,
}

/// Splits an accepted socket into its typed halves.
pub fn split_socket(socket: WebSocket) -> (WsClientSink, WsClientSource) {
    let (socket_tx, socket_rx) = socket.split();
    (
        WsClientSink {
            socket_tx: Mutex::new(socket_tx),
        },
        WsClientSource { socket_rx },
    )
}

#[async_trait]
impl ClientSink for WsClientSink {
    async fn send(&self, msg: ServerMessage) -> Result<()> {
        let serialized = serde_json::to_string(&msg)?;
        self.socket_tx
            .lock()
            .await
            .send(Message::Text(serialized.into()))
            .await
            .context(SessionError::ClientDisconnected)?;
        Ok(())
    }
}

#[async_trait]
impl ClientSource for WsClientSource {
    async fn recv(&mut self) -> Result<Option<ClientMessage>> {
        while let Some(msg) = self.socket_rx.next().await {
            match msg.context(SessionError::ClientDisconnected)? {
                Message::Text(text) => return ClientMessage::parse(text.as_str()).map(Some),
                Message::Binary(data) => {
                    return ClientMessage::parse(&String::from_utf8_lossy(&data)).map(Some);
                }
                Message::Close(frame) => {
                    debug!(?frame, "Client sent close frame");
                    return Ok(None);
                }
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
        Ok(None)
    }
}

/// Sends a message whose delivery is best effort (error reports, notices).
/// Failures are logged, never propagated.
pub async fn send_best_effort(client: &dyn ClientSink, msg: ServerMessage) {
    if let Err(e) = client.send(msg).await {
        if e.to_string().to_lowercase().contains("closed") {
            tracing::warn!("Attempted to send on closed WebSocket.");
        } else {
            tracing::error!(error = %e, "Failed to send message to client");
        }
    }
}
