//! Wire types for the Gemini Live `BidiGenerateContent` WebSocket protocol.
//!
//! Only the subset of the protocol used by the avatar service is modelled.
//! Client messages serialize to the externally tagged camelCase shape the
//! service expects (`{"setup": {...}}`, `{"realtimeInput": {...}}`, ...).

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// --- Client -> server ---

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
}

/// The first message of every session.
#[derive(Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realtime_input_config: Option<RealtimeInputConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<AudioTranscriptionConfig>,
}

impl Setup {
    /// Creates a setup for `model`, adding the `models/` prefix when missing.
    pub fn new(model: &str, modality: ResponseModality) -> Self {
        let model = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        };
        Self {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec![modality],
                speech_config: None,
            },
            ..Default::default()
        }
    }

    pub fn with_voice(mut self, voice_name: impl Into<String>) -> Self {
        self.generation_config.speech_config = Some(SpeechConfig {
            voice_config: VoiceConfig {
                prebuilt_voice_config: PrebuiltVoiceConfig {
                    voice_name: voice_name.into(),
                },
            },
        });
        self
    }

    pub fn with_system_instruction(mut self, text: impl Into<String>) -> Self {
        self.system_instruction = Some(Content::text(text));
        self
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_activity_detection(mut self, detection: AutomaticActivityDetection) -> Self {
        self.realtime_input_config = Some(RealtimeInputConfig {
            automatic_activity_detection: detection,
        });
        self
    }

    pub fn with_output_transcription(mut self) -> Self {
        self.output_audio_transcription = Some(AudioTranscriptionConfig {});
        self
    }
}

#[derive(Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<ResponseModality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseModality {
    Text,
    Audio,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputConfig {
    pub automatic_activity_detection: AutomaticActivityDetection,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AutomaticActivityDetection {
    pub disabled: bool,
    pub start_of_speech_sensitivity: StartSensitivity,
    pub end_of_speech_sensitivity: EndSensitivity,
}

impl Default for AutomaticActivityDetection {
    fn default() -> Self {
        Self {
            disabled: false,
            start_of_speech_sensitivity: StartSensitivity::StartSensitivityLow,
            end_of_speech_sensitivity: EndSensitivity::EndSensitivityLow,
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StartSensitivity {
    StartSensitivityHigh,
    StartSensitivityLow,
}

#[derive(Serialize, Debug, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndSensitivity {
    EndSensitivityHigh,
    EndSensitivityLow,
}

#[derive(Serialize, Debug, Clone)]
pub struct AudioTranscriptionConfig {}

/// A tool entry in the setup message.
#[derive(Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub function_declarations: Vec<FunctionDeclaration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub google_search: Option<GoogleSearch>,
}

impl Tool {
    pub fn functions(function_declarations: Vec<FunctionDeclaration>) -> Self {
        Self {
            function_declarations,
            google_search: None,
        }
    }

    pub fn google_search() -> Self {
        Self {
            function_declarations: Vec::new(),
            google_search: Some(GoogleSearch {}),
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct GoogleSearch {}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            role: None,
            parts: vec![Part {
                text: Some(text.into()),
                inline_data: None,
            }],
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

/// Binary payload; `data` is base64 on the wire.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    #[serde(default)]
    pub mime_type: String,
    pub data: String,
}

impl Blob {
    pub fn new(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    pub fn decode(&self) -> anyhow::Result<Vec<u8>> {
        Ok(base64::engine::general_purpose::STANDARD.decode(&self.data)?)
    }
}

pub const PCM16_INPUT_MIME: &str = "audio/pcm;rate=16000";
pub const JPEG_MIME: &str = "image/jpeg";

/// One realtime input chunk. Exactly one field is set.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct RealtimeInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<Blob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<Blob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl RealtimeInput {
    /// 16 kHz little-endian PCM16 microphone audio.
    pub fn audio(pcm: &[u8]) -> Self {
        Self {
            audio: Some(Blob::new(PCM16_INPUT_MIME, pcm)),
            ..Default::default()
        }
    }

    /// A single JPEG frame.
    pub fn image(jpeg: &[u8]) -> Self {
        Self {
            video: Some(Blob::new(JPEG_MIME, jpeg)),
            ..Default::default()
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FunctionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub response: Value,
}

// --- Server -> client ---

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<Value>,
    pub server_content: Option<ServerContent>,
    pub tool_call: Option<ToolCall>,
    pub tool_call_cancellation: Option<ToolCallCancellation>,
    pub go_away: Option<GoAway>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub generation_complete: bool,
    pub input_transcription: Option<Transcription>,
    pub output_transcription: Option<Transcription>,
}

impl ServerContent {
    /// Inline audio blobs carried by the model turn, in part order.
    pub fn inline_audio(&self) -> impl Iterator<Item = &Blob> {
        self.model_turn
            .iter()
            .flat_map(|turn| turn.parts.iter())
            .filter_map(|part| part.inline_data.as_ref())
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ToolCallCancellation {
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    pub time_left: Option<String>,
}

/// A server message reduced to the variant the session cares about.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    Content(ServerContent),
    ToolCall(ToolCall),
    ToolCallCancellation(ToolCallCancellation),
    GoAway(GoAway),
}

impl ServerMessage {
    /// `None` for messages without session-relevant payload (setup acks, usage metadata).
    pub fn into_event(self) -> Option<LiveEvent> {
        if let Some(call) = self.tool_call {
            Some(LiveEvent::ToolCall(call))
        } else if let Some(content) = self.server_content {
            Some(LiveEvent::Content(content))
        } else if let Some(cancellation) = self.tool_call_cancellation {
            Some(LiveEvent::ToolCallCancellation(cancellation))
        } else {
            self.go_away.map(LiveEvent::GoAway)
        }
    }
}
