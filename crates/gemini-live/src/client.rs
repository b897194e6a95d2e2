//! Connection handling for a Gemini Live session.

use crate::types::{
    ClientMessage, FunctionResponse, LiveEvent, RealtimeInput, ServerMessage, Setup, ToolResponse,
};
use anyhow::{Context, Result, anyhow, bail};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::{net::TcpStream, sync::Mutex};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::protocol::{CloseFrame, Message, frame::coding::CloseCode},
};
use tracing::{debug, info, warn};

pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

type LiveSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Entry point for opening Gemini Live sessions.
#[derive(Clone, Debug)]
pub struct LiveClient {
    endpoint: String,
    api_key: String,
}

impl LiveClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Opens the socket, sends `setup` and waits for `setupComplete`.
    ///
    /// The returned halves are independent: the sender may be shared between
    /// tasks, the receiver is owned by whichever task drains the session.
    pub async fn connect(&self, setup: Setup) -> Result<(LiveSender, LiveReceiver)> {
        let url = format!("{}?key={}", self.endpoint, self.api_key);
        let (ws_stream, _) = connect_async(url)
            .await
            .context("Failed to connect to Gemini Live WebSocket")?;
        info!(model = %setup.model, "Connected to Gemini Live WebSocket.");
        let (mut sink, mut stream) = ws_stream.split();

        let payload = serde_json::to_string(&ClientMessage::Setup(setup))?;
        sink.send(Message::Text(payload.into())).await?;

        loop {
            let frame = stream
                .next()
                .await
                .ok_or_else(|| anyhow!("Gemini Live connection closed before setup completed"))??;
            match frame {
                Message::Text(text) => {
                    if setup_completed(text.as_bytes())? {
                        break;
                    }
                }
                Message::Binary(data) => {
                    if setup_completed(&data)? {
                        break;
                    }
                }
                Message::Close(frame) => {
                    bail!("Gemini Live rejected the setup: {}", describe_close(frame.as_ref()));
                }
                _ => {}
            }
        }
        info!("Gemini Live session setup is complete.");

        Ok((
            LiveSender {
                sink: Mutex::new(sink),
            },
            LiveReceiver { stream },
        ))
    }
}

fn setup_completed(raw: &[u8]) -> Result<bool> {
    let msg: ServerMessage =
        serde_json::from_slice(raw).context("Failed to parse Gemini Live setup response")?;
    if msg.setup_complete.is_none() {
        warn!("Received unexpected message during Gemini Live setup");
    }
    Ok(msg.setup_complete.is_some())
}

fn describe_close(frame: Option<&CloseFrame>) -> String {
    match frame {
        Some(frame) => format!("code {}: {}", u16::from(frame.code), frame.reason),
        None => "no close frame".to_string(),
    }
}

/// Write half of a session. Sends are serialised through one mutex, so the
/// client input path and the tool result path can share it.
pub struct LiveSender {
    sink: Mutex<SplitSink<LiveSocket, Message>>,
}

impl LiveSender {
    async fn send(&self, msg: &ClientMessage) -> Result<()> {
        let payload = serde_json::to_string(msg)?;
        self.sink
            .lock()
            .await
            .send(Message::Text(payload.into()))
            .await?;
        Ok(())
    }

    pub async fn send_realtime_input(&self, input: RealtimeInput) -> Result<()> {
        self.send(&ClientMessage::RealtimeInput(input)).await
    }

    pub async fn send_tool_response(&self, function_responses: Vec<FunctionResponse>) -> Result<()> {
        self.send(&ClientMessage::ToolResponse(ToolResponse { function_responses }))
            .await
    }

    /// Sends a close frame and flushes the socket.
    pub async fn close(&self) -> Result<()> {
        self.sink.lock().await.close().await?;
        Ok(())
    }
}

/// Read half of a session: a finite, non-restartable sequence of events.
pub struct LiveReceiver {
    stream: SplitStream<LiveSocket>,
}

impl LiveReceiver {
    /// Returns the next session event, `Ok(None)` once the server closed normally.
    ///
    /// A close with any other code is an error carrying the server's reason.
    pub async fn next_event(&mut self) -> Result<Option<LiveEvent>> {
        while let Some(frame) = self.stream.next().await {
            let msg = match frame? {
                Message::Text(text) => decode(text.as_bytes()),
                Message::Binary(data) => decode(&data),
                Message::Close(frame) => {
                    return match frame {
                        Some(frame) if frame.code != CloseCode::Normal => Err(anyhow!(
                            "Gemini Live closed the session ({})",
                            describe_close(Some(&frame))
                        )),
                        _ => {
                            info!("Gemini Live closed the session normally.");
                            Ok(None)
                        }
                    };
                }
                _ => continue,
            };
            if let Some(event) = msg.and_then(ServerMessage::into_event) {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }
}

fn decode(raw: &[u8]) -> Option<ServerMessage> {
    match serde_json::from_slice::<ServerMessage>(raw) {
        Ok(msg) => Some(msg),
        Err(e) => {
            warn!(error = %e, "Failed to parse Gemini Live message; skipping");
            debug!(raw = %String::from_utf8_lossy(raw), "Unparsed Gemini Live payload");
            None
        }
    }
}
