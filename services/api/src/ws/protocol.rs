//! Defines the WebSocket message protocol between the browser client and the API server.

use crate::audio_utils;
use anyhow::{Context, Result};
use avatar_core::WordTimings;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages sent from the client (browser) to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// 16 kHz PCM16 microphone audio.
    Audio(Vec<u8>),
    /// One JPEG frame from the camera or a screen share.
    Image(Vec<u8>),
    /// Typed user text.
    Text(String),
    /// The user stopped recording. Informational only.
    End,
    /// Anything else; carries the reported `type` for logging.
    Unknown(String),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    data: Value,
}

impl ClientMessage {
    /// Parses one client frame. Malformed JSON or base64 is an error; an
    /// unrecognised `type` is not.
    pub fn parse(raw: &str) -> Result<Self> {
        let envelope: Envelope =
            serde_json::from_str(raw).context("Client sent a malformed message")?;
        let kind = envelope.kind.unwrap_or_default();
        let msg = match kind.as_str() {
            "audio" => ClientMessage::Audio(decode_data(&envelope.data, "audio")?),
            "image" => ClientMessage::Image(decode_data(&envelope.data, "image")?),
            "text" => ClientMessage::Text(match envelope.data {
                Value::String(text) => text,
                other => other.to_string(),
            }),
            "end" => ClientMessage::End,
            _ => ClientMessage::Unknown(kind),
        };
        Ok(msg)
    }
}

fn decode_data(data: &Value, kind: &str) -> Result<Vec<u8>> {
    let encoded = data
        .as_str()
        .with_context(|| format!("`{kind}` message must carry base64 `data`"))?;
    audio_utils::decode_base64(encoded).with_context(|| format!("Invalid base64 in `{kind}` message"))
}

/// Error categories reported to the client.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Timeout,
    Disconnection,
    QuotaExceeded,
    McpConnection,
    AudioProcessing,
    General,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorType>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct DebugPayload {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum AudioPayload {
    /// A raw base64 audio delta (text modality passthrough).
    Chunk(String),
    /// A finished turn: base64 WAV plus lip-sync timings.
    Turn { audio: String, words: WordTimings },
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FunctionCallPayload {
    pub name: String,
    pub args: Value,
    pub result: Value,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct InterruptedPayload {
    pub message: String,
}

/// Messages sent from the server to the client (browser).
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Presentation settings for the avatar, sent once right after accept.
    #[serde(rename_all = "camelCase")]
    Config {
        tts_apikey: Option<String>,
        tts_lang: String,
        tts_voice: String,
        avatar_path: String,
    },
    Error { data: ErrorPayload },
    Debug { data: DebugPayload },
    Text { data: String },
    Audio { data: AudioPayload },
    Interrupted { data: InterruptedPayload },
    TurnComplete,
    FunctionCall { data: FunctionCallPayload },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>, action: Option<&str>, error_type: ErrorType) -> Self {
        ServerMessage::Error {
            data: ErrorPayload {
                message: message.into(),
                action: action.map(str::to_string),
                error_type: Some(error_type),
            },
        }
    }

    pub fn debug(message: impl Into<String>, action: Option<&str>) -> Self {
        ServerMessage::Debug {
            data: DebugPayload {
                message: message.into(),
                action: action.map(str::to_string),
            },
        }
    }

    pub fn interrupted() -> Self {
        ServerMessage::Interrupted {
            data: InterruptedPayload {
                message: "Response interrupted by user input".to_string(),
            },
        }
    }
}
