//! Word-timing alignment for finished audio turns.
//!
//! Alignment is blocking (a speech model runs behind it), so callers are
//! expected to invoke [`WordAligner::align`] from a blocking thread.

use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Per-word start times and durations in milliseconds, index-aligned with `words`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct WordTimings {
    pub words: Vec<String>,
    pub wtimes: Vec<i64>,
    pub wdurations: Vec<i64>,
}

impl WordTimings {
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    fn push(&mut self, word: String, start_secs: f64, end_secs: f64) {
        self.words.push(word);
        self.wtimes.push((start_secs * 1000.0) as i64);
        self.wdurations.push(((end_secs - start_secs) * 1000.0) as i64);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AlignError {
    #[error("No segments found in transcription. Check the audio quality.")]
    NoSpeech,
    #[error("Failed to read audio file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Aligner request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Converts a WAV file into word timings.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
pub trait WordAligner: Send + Sync {
    fn align(&self, wav_path: &Path) -> Result<WordTimings, AlignError>;
}

#[derive(Deserialize, Debug)]
struct AlignedWord {
    word: String,
    start: f64,
    end: f64,
}

#[derive(Deserialize, Debug)]
struct AlignedSegment {
    #[serde(default)]
    words: Vec<AlignedWord>,
}

/// Accepted response bodies: ready-made timings, or whisperX-style segments.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum AlignmentResponse {
    Timings(WordTimings),
    Segments { segments: Vec<AlignedSegment> },
}

impl AlignmentResponse {
    fn into_timings(self) -> Result<WordTimings, AlignError> {
        let timings = match self {
            AlignmentResponse::Timings(timings) => timings,
            AlignmentResponse::Segments { segments } => {
                let mut timings = WordTimings::default();
                for word in segments.into_iter().flat_map(|s| s.words) {
                    timings.push(word.word, word.start, word.end);
                }
                timings
            }
        };
        if timings.is_empty() {
            return Err(AlignError::NoSpeech);
        }
        Ok(timings)
    }
}

/// Aligner backed by an HTTP alignment service.
///
/// The WAV file is POSTed as `audio/wav`. A blocking client is built per call,
/// on the calling thread, so this type can be created and dropped inside an
/// async runtime.
#[derive(Debug, Clone)]
pub struct HttpWordAligner {
    endpoint: String,
    timeout: Duration,
}

impl HttpWordAligner {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl WordAligner for HttpWordAligner {
    fn align(&self, wav_path: &Path) -> Result<WordTimings, AlignError> {
        let audio = std::fs::read(wav_path)?;
        info!(bytes = audio.len(), endpoint = %self.endpoint, "Requesting word alignment");
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()?;
        let response: AlignmentResponse = client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "audio/wav")
            .body(audio)
            .send()?
            .error_for_status()?
            .json()?;
        let timings = response.into_timings()?;
        debug!(words = timings.len(), "Alignment complete");
        Ok(timings)
    }
}
