use gemini_live::ResponseModality;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{Level, warn};

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all process configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub gemini_api_key: String,
    pub gemini_live_url: Option<String>,
    pub tts_api_key: Option<String>,
    pub log_level: Level,
    pub runtime_config_path: PathBuf,
    pub prompts_path: PathBuf,
    pub aligner_url: String,
    pub aligner_timeout: Duration,
    pub upstream_connect_timeout: Duration,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let gemini_api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;
        let gemini_live_url = std::env::var("GEMINI_LIVE_URL").ok();
        let tts_api_key = std::env::var("TTS_API_KEY").ok();

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let runtime_config_path = std::env::var("RUNTIME_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("runtime_config.json"));

        let prompts_path = std::env::var("PROMPTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./prompts"));

        let aligner_url = std::env::var("ALIGNER_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:9000/align".to_string());

        let aligner_timeout_str =
            std::env::var("ALIGNER_TIMEOUT_SECS").unwrap_or_else(|_| "60".to_string());
        let aligner_timeout = aligner_timeout_str
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| ConfigError::InvalidValue("ALIGNER_TIMEOUT_SECS".to_string(), e.to_string()))?;

        let timeout_str =
            std::env::var("UPSTREAM_CONNECT_TIMEOUT_SECS").unwrap_or_else(|_| "30".to_string());
        let upstream_connect_timeout = timeout_str
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| {
                ConfigError::InvalidValue("UPSTREAM_CONNECT_TIMEOUT_SECS".to_string(), e.to_string())
            })?;

        Ok(Self {
            bind_address,
            gemini_api_key,
            gemini_live_url,
            tts_api_key,
            log_level,
            runtime_config_path,
            prompts_path,
            aligner_url,
            aligner_timeout,
            upstream_connect_timeout,
        })
    }
}

/// How the model answers: streamed text deltas, or audio turns with lip-sync data.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    #[default]
    Audio,
}

impl From<Modality> for ResponseModality {
    fn from(modality: Modality) -> Self {
        match modality {
            Modality::Text => ResponseModality::Text,
            Modality::Audio => ResponseModality::Audio,
        }
    }
}

/// Per-session settings, re-read from JSON on every connection.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub google_search_grounding: bool,
    pub tts_lang: String,
    pub tts_voice: String,
    pub avatar_path: String,
    pub model_name: String,
    pub mcp_server_config: Option<PathBuf>,
    pub response_modality: Modality,
    pub voice_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            google_search_grounding: false,
            tts_lang: "en-US".to_string(),
            tts_voice: "en-GB-Standard-A".to_string(),
            avatar_path: "https://models.readyplayer.me/64bfa15f0e72c63d7c3934a6.glb".to_string(),
            model_name: "gemini-live-2.5-flash-preview".to_string(),
            mcp_server_config: None,
            response_modality: Modality::Audio,
            voice_name: "Kore".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Reads the runtime config. A missing file means defaults; a malformed one is an error.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Runtime config not found; using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Used when the prompts directory has no `system_prompt.md`.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a helpful and friendly AI assistant.\n\
Respond in clear, plain text using natural, conversational language.";

/// Reads `system_prompt.md` from the prompts directory, falling back to the default.
pub fn load_system_instruction(prompts_path: &Path) -> anyhow::Result<String> {
    let path = prompts_path.join("system_prompt.md");
    match std::fs::read_to_string(&path) {
        Ok(prompt) if !prompt.trim().is_empty() => Ok(prompt.trim().to_string()),
        Ok(_) => {
            warn!(path = %path.display(), "System prompt is empty; using default");
            Ok(DEFAULT_SYSTEM_INSTRUCTION.to_string())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "System prompt not found; using default");
            Ok(DEFAULT_SYSTEM_INSTRUCTION.to_string())
        }
        Err(e) => Err(e.into()),
    }
}
