//! Audio turn buffering and finalization for the audio response modality.
//!
//! Model speech is accumulated per turn. On `turn_complete` the turn is taken
//! out of the buffer, wrapped as WAV, aligned into word timings on a blocking
//! thread and sent to the client as one `audio` event.

use super::{
    client::{ClientSink, send_best_effort},
    protocol::{AudioPayload, ErrorType, ServerMessage},
    state::Session,
};
use crate::audio_utils::{encode_base64, output_wav_spec, pcm16_to_wav};
use avatar_core::{AlignError, WordAligner, WordTimings};
use std::{io::Write, sync::Arc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// PCM16 audio of one model turn, open from its first audio delta until `turn_complete`.
#[derive(Debug, Default)]
pub struct AudioTurn {
    pcm: Vec<u8>,
    chunks: usize,
}

impl AudioTurn {
    fn append(&mut self, frame: &[u8]) {
        self.pcm.extend_from_slice(frame);
        self.chunks += 1;
    }

    pub fn len(&self) -> usize {
        self.pcm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Accumulating,
}

/// Holds at most one open [`AudioTurn`].
#[derive(Debug, Default)]
pub struct AudioTurnBuffer {
    turn: Option<AudioTurn>,
}

impl AudioTurnBuffer {
    pub fn state(&self) -> TurnState {
        match self.turn {
            Some(_) => TurnState::Accumulating,
            None => TurnState::Idle,
        }
    }

    /// Appends a frame, opening a fresh turn if none is open.
    pub fn append(&mut self, frame: &[u8]) {
        let turn = self.turn.get_or_insert_with(|| {
            info!("Opened audio turn buffer");
            AudioTurn::default()
        });
        turn.append(frame);
    }

    /// Closes the open turn, if any, and returns the buffer to idle.
    pub fn take(&mut self) -> Option<AudioTurn> {
        self.turn.take()
    }
}

/// A turn handed from the response pump to the finalizer. `generation` is the
/// session's audio turn generation at hand-off.
#[derive(Debug)]
pub struct ClosedTurn {
    pub generation: u64,
    pub audio: Option<AudioTurn>,
}

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("no audio was received for this turn")]
    EmptyTurn,
    #[error("failed to build WAV container: {0}")]
    Container(#[from] hound::Error),
    #[error("failed to write temporary audio file: {0}")]
    TempFile(#[from] std::io::Error),
    #[error(transparent)]
    Align(#[from] AlignError),
    #[error("alignment worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

#[derive(Debug)]
pub struct FinishedTurn {
    pub wav: Vec<u8>,
    pub words: WordTimings,
}

/// Turns a closed audio turn into WAV plus word timings.
///
/// Container building, the temporary file and the aligner all run on a
/// blocking thread. The temporary file is removed when the worker returns.
pub async fn finalize(
    turn: Option<AudioTurn>,
    aligner: Arc<dyn WordAligner>,
) -> Result<FinishedTurn, AudioError> {
    let turn = turn.filter(|t| !t.is_empty()).ok_or(AudioError::EmptyTurn)?;
    info!(bytes = turn.len(), chunks = turn.chunks, "Finalizing audio turn");

    tokio::task::spawn_blocking(move || -> Result<FinishedTurn, AudioError> {
        let wav = pcm16_to_wav(&turn.pcm, output_wav_spec())?;
        drop(turn);
        let mut file = tempfile::Builder::new().prefix("turn-").suffix(".wav").tempfile()?;
        file.write_all(&wav)?;
        file.flush()?;
        let words = aligner.align(file.path())?;
        debug!(words = words.len(), "Aligned audio turn");
        Ok(FinishedTurn { wav, words })
    })
    .await?
}

/// Finalizes closed turns one after another, so their audio events reach the
/// client in turn order. The receiving flag is left alone once a newer turn
/// has started streaming.
pub async fn run_audio_finalizer(
    session: Arc<Session>,
    client: Arc<dyn ClientSink>,
    aligner: Arc<dyn WordAligner>,
    mut turns: mpsc::UnboundedReceiver<ClosedTurn>,
    cancel: CancellationToken,
) {
    loop {
        let turn = tokio::select! {
            () = cancel.cancelled() => break,
            next = turns.recv() => match next {
                Some(turn) => turn,
                None => break,
            },
        };
        let msg = tokio::select! {
            () = cancel.cancelled() => break,
            result = finalize(turn.audio, aligner.clone()) => match result {
                Ok(finished) => ServerMessage::Audio {
                    data: AudioPayload::Turn {
                        audio: encode_base64(&finished.wav),
                        words: finished.words,
                    },
                },
                Err(e) => {
                    error!(error = %e, "Error generating viseme data from audio");
                    ServerMessage::error(
                        format!("Failed to process audio: {e}"),
                        None,
                        ErrorType::AudioProcessing,
                    )
                }
            },
        };
        send_best_effort(client.as_ref(), msg).await;
        if !session.finish_audio_turn(turn.generation) {
            debug!(generation = turn.generation, "Newer audio turn open; receiving flag kept");
        }
    }
    debug!("Audio finalizer stopped.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::testing;
    use avatar_core::aligner::MockWordAligner;
    use std::io::Cursor;

    fn timings() -> WordTimings {
        WordTimings {
            words: vec!["hello".into(), "there".into()],
            wtimes: vec![0, 400],
            wdurations: vec![350, 300],
        }
    }

    #[test]
    fn test_buffer_state_machine() {
        let mut buffer = AudioTurnBuffer::default();
        assert_eq!(buffer.state(), TurnState::Idle);
        assert!(buffer.take().is_none());

        buffer.append(&[1, 0]);
        assert_eq!(buffer.state(), TurnState::Accumulating);
        buffer.append(&[2, 0, 3, 0]);
        assert_eq!(buffer.state(), TurnState::Accumulating);

        let turn = buffer.take().unwrap();
        assert_eq!(turn.len(), 6);
        assert_eq!(turn.chunks, 2);
        assert_eq!(buffer.state(), TurnState::Idle);

        buffer.append(&[4, 0]);
        assert_eq!(buffer.take().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_finalize_wraps_wav_and_aligns() {
        let mut aligner = MockWordAligner::new();
        aligner
            .expect_align()
            .times(1)
            .withf(|path| {
                path.extension().is_some_and(|ext| ext == "wav")
                    && std::fs::read(path).is_ok_and(|bytes| bytes.starts_with(b"RIFF"))
            })
            .returning(|_| Ok(timings()));

        let mut buffer = AudioTurnBuffer::default();
        buffer.append(&[0x10, 0x00, 0x20, 0x00]);
        buffer.append(&[0x30, 0x00]);
        let finished = finalize(buffer.take(), Arc::new(aligner)).await.unwrap();

        assert_eq!(finished.words, timings());
        let reader = hound::WavReader::new(Cursor::new(finished.wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, 24000);
        let samples: Vec<i16> = reader.into_samples::<i16>().map(Result::unwrap).collect();
        assert_eq!(samples, vec![0x10, 0x20, 0x30]);
    }

    #[tokio::test]
    async fn test_finalize_empty_turn() {
        let mut aligner = MockWordAligner::new();
        aligner.expect_align().never();
        let aligner: Arc<dyn WordAligner> = Arc::new(aligner);

        assert!(matches!(
            finalize(None, aligner.clone()).await,
            Err(AudioError::EmptyTurn)
        ));
        assert!(matches!(
            finalize(Some(AudioTurn::default()), aligner).await,
            Err(AudioError::EmptyTurn)
        ));
    }

    #[tokio::test]
    async fn test_finalize_reports_alignment_failure() {
        let mut aligner = MockWordAligner::new();
        aligner.expect_align().returning(|_| Err(AlignError::NoSpeech));
        let mut buffer = AudioTurnBuffer::default();
        buffer.append(&[0, 0]);

        let err = finalize(buffer.take(), Arc::new(aligner)).await.unwrap_err();
        assert!(matches!(err, AudioError::Align(AlignError::NoSpeech)));
        assert!(err.to_string().contains("No segments found"));
    }

    #[tokio::test]
    async fn test_finalizer_sends_results_in_order() {
        let mut aligner = MockWordAligner::new();
        aligner.expect_align().returning(|_| Ok(timings()));
        let session = Arc::new(Session::new());
        session.open_audio_turn();
        session.mark_model_output();
        let generation = session.hand_off_audio_turn();
        let (client, mut client_rx) = testing::client_sink();
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(run_audio_finalizer(
            session.clone(),
            client,
            Arc::new(aligner),
            rx,
            cancel.clone(),
        ));

        let mut buffer = AudioTurnBuffer::default();
        buffer.append(&[1, 0]);
        for audio in [buffer.take(), buffer.take()] {
            tx.send(ClosedTurn { generation, audio }).unwrap();
        }

        match testing::next(&mut client_rx).await {
            ServerMessage::Audio {
                data: AudioPayload::Turn { words, .. },
            } => assert_eq!(words, timings()),
            other => panic!("unexpected message: {other:?}"),
        }
        match testing::next(&mut client_rx).await {
            ServerMessage::Error { data } => {
                assert_eq!(data.error_type, Some(ErrorType::AudioProcessing));
                assert_eq!(data.message, "Failed to process audio: no audio was received for this turn");
            }
            other => panic!("unexpected message: {other:?}"),
        }
        cancel.cancel();
        worker.await.unwrap();
        assert!(!session.is_receiving_response());
    }

    #[tokio::test]
    async fn test_finalizer_keeps_flag_while_next_turn_streams() {
        let mut aligner = MockWordAligner::new();
        aligner.expect_align().returning(|_| {
            std::thread::sleep(std::time::Duration::from_millis(100));
            Ok(timings())
        });
        let session = Arc::new(Session::new());
        let (client, mut client_rx) = testing::client_sink();
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(run_audio_finalizer(
            session.clone(),
            client,
            Arc::new(aligner),
            rx,
            cancel.clone(),
        ));

        let mut buffer = AudioTurnBuffer::default();
        session.open_audio_turn();
        session.mark_model_output();
        buffer.append(&[1, 0]);
        let generation = session.hand_off_audio_turn();
        tx.send(ClosedTurn { generation, audio: buffer.take() }).unwrap();

        session.open_audio_turn();
        session.mark_model_output();
        buffer.append(&[2, 0]);

        assert!(matches!(
            testing::next(&mut client_rx).await,
            ServerMessage::Audio { .. }
        ));
        assert!(session.is_receiving_response());

        let generation = session.hand_off_audio_turn();
        tx.send(ClosedTurn { generation, audio: buffer.take() }).unwrap();
        assert!(matches!(
            testing::next(&mut client_rx).await,
            ServerMessage::Audio { .. }
        ));
        cancel.cancel();
        worker.await.unwrap();
        assert!(!session.is_receiving_response());
    }
}
