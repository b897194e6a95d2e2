//! The two message pumps of a live session.
//!
//! - `client_pump`: browser messages -> realtime input upstream.
//! - `response_pump`: upstream events -> browser, with tool calls diverted to
//!   the dispatch queue and, in audio modality, speech diverted through the
//!   audio turn buffer.

use super::{
    audio::{AudioTurnBuffer, ClosedTurn, TurnState, run_audio_finalizer},
    client::{ClientSink, ClientSource},
    dispatch::{ToolCallQueue, run_tool_dispatch},
    errors::is_ordinary_close,
    protocol::{AudioPayload, ClientMessage, ServerMessage},
    state::Session,
    upstream::UpstreamSource,
};
use crate::config::Modality;
use anyhow::{Context, Result};
use avatar_core::WordAligner;
use gemini_live::{LiveEvent, RealtimeInput, ServerContent};
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

/// Forwards client input upstream in arrival order until the client leaves
/// or the scope is cancelled.
pub async fn client_pump(
    session: Arc<Session>,
    mut client: Box<dyn ClientSource>,
    cancel: CancellationToken,
) -> Result<()> {
    let upstream = session
        .upstream()
        .cloned()
        .context("No upstream stream attached to session")?;

    loop {
        let received = tokio::select! {
            () = cancel.cancelled() => break,
            received = client.recv() => received,
        };
        let msg = match received {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                info!("Client disconnected");
                break;
            }
            Err(e) if is_ordinary_close(&e) => {
                info!("Client connection closed");
                break;
            }
            Err(e) => return Err(e),
        };

        match msg {
            ClientMessage::Audio(pcm) => {
                debug!(bytes = pcm.len(), "Forwarding audio");
                upstream.send_realtime_input(RealtimeInput::audio(&pcm)).await?;
            }
            ClientMessage::Image(jpeg) => {
                debug!(bytes = jpeg.len(), "Forwarding image");
                upstream.send_realtime_input(RealtimeInput::image(&jpeg)).await?;
            }
            ClientMessage::Text(text) => {
                info!(%text, "Forwarding text");
                upstream.send_realtime_input(RealtimeInput::text(text)).await?;
            }
            ClientMessage::End => info!("Received end of user turn"),
            ClientMessage::Unknown(kind) => warn!(%kind, "Ignoring unknown client message type"),
        }
    }
    Ok(())
}

/// Everything the response pump needs besides the upstream stream itself.
#[derive(Clone)]
pub struct ResponseContext {
    pub session: Arc<Session>,
    pub client: Arc<dyn ClientSink>,
    pub modality: Modality,
    pub aligner: Arc<dyn WordAligner>,
}

/// Drains upstream events until the stream ends, fails or the scope is
/// cancelled. The tool dispatcher and the audio finalizer run nested inside
/// and are stopped before this returns.
pub async fn response_pump(
    ctx: ResponseContext,
    upstream: Box<dyn UpstreamSource>,
    cancel: CancellationToken,
) -> Result<()> {
    let workers = cancel.child_token();
    let mut tasks = JoinSet::new();

    let (tool_tx, tool_rx) = mpsc::unbounded_channel();
    tasks.spawn(
        run_tool_dispatch(ctx.session.clone(), ctx.client.clone(), tool_rx, workers.clone())
            .in_current_span(),
    );

    let (turn_tx, turn_rx) = mpsc::unbounded_channel();
    if ctx.modality == Modality::Audio {
        tasks.spawn(
            run_audio_finalizer(
                ctx.session.clone(),
                ctx.client.clone(),
                ctx.aligner.clone(),
                turn_rx,
                workers.clone(),
            )
            .in_current_span(),
        );
    }

    let outcome = drain(&ctx, upstream, &tool_tx, &turn_tx, &cancel).await;

    workers.cancel();
    while tasks.join_next().await.is_some() {}
    outcome
}

async fn drain(
    ctx: &ResponseContext,
    mut upstream: Box<dyn UpstreamSource>,
    tool_tx: &ToolCallQueue,
    turn_tx: &mpsc::UnboundedSender<ClosedTurn>,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut buffer = AudioTurnBuffer::default();

    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            next = upstream.next_event() => next,
        };
        let Some(event) = next.context("Error from Gemini stream")? else {
            info!("Gemini Live stream ended");
            return Ok(());
        };

        match event {
            LiveEvent::ToolCall(tool_call) => {
                if tool_tx.send(tool_call).is_err() {
                    warn!("Tool dispatcher is gone; dropping tool call");
                }
            }
            LiveEvent::Content(content) => match ctx.modality {
                Modality::Text => forward_text_mode(ctx, content).await?,
                Modality::Audio => buffer_audio_mode(ctx, &mut buffer, turn_tx, content).await?,
            },
            LiveEvent::ToolCallCancellation(cancellation) => {
                info!(ids = ?cancellation.ids, "Gemini cancelled tool calls");
            }
            LiveEvent::GoAway(go_away) => {
                let time_left = go_away.time_left.unwrap_or_else(|| "unknown".to_string());
                warn!(%time_left, "Gemini Live will close the session soon");
                ctx.client
                    .send(ServerMessage::debug(
                        format!("Gemini Live will close the session soon (time left: {time_left})"),
                        None,
                    ))
                    .await?;
            }
        }
    }
}

async fn forward_text_mode(ctx: &ResponseContext, content: ServerContent) -> Result<()> {
    let ResponseContext { session, client, .. } = ctx;

    if content.interrupted {
        info!("Interruption detected from Gemini");
        client.send(ServerMessage::interrupted()).await?;
        session.clear_receiving_response();
        return Ok(());
    }

    if let Some(transcription) = content.output_transcription {
        info!(text = %transcription.text, "Transcription received");
        client
            .send(ServerMessage::Text {
                data: transcription.text,
            })
            .await?;
    }

    if let Some(turn) = content.model_turn {
        session.mark_model_output();
        for part in turn.parts {
            if let Some(blob) = part.inline_data {
                client
                    .send(ServerMessage::Audio {
                        data: AudioPayload::Chunk(blob.data),
                    })
                    .await?;
            } else if let Some(text) = part.text {
                client.send(ServerMessage::Text { data: text }).await?;
            }
        }
    }

    if content.turn_complete {
        client.send(ServerMessage::TurnComplete).await?;
        session.reset_turn();
    }
    Ok(())
}

async fn buffer_audio_mode(
    ctx: &ResponseContext,
    buffer: &mut AudioTurnBuffer,
    turn_tx: &mpsc::UnboundedSender<ClosedTurn>,
    content: ServerContent,
) -> Result<()> {
    let ResponseContext { session, client, .. } = ctx;

    if content.interrupted {
        info!("Interruption detected from Gemini");
        client.send(ServerMessage::interrupted()).await?;
        session.clear_receiving_response();
    }

    for blob in content.inline_audio() {
        match blob.decode() {
            Ok(pcm) => {
                if buffer.state() == TurnState::Idle {
                    let generation = session.open_audio_turn();
                    debug!(generation, "Audio turn started");
                }
                buffer.append(&pcm);
                session.mark_model_output();
            }
            Err(e) => warn!(error = %e, "Skipping undecodable audio chunk"),
        }
    }

    if let Some(transcription) = &content.output_transcription {
        info!(text = %transcription.text, "Transcription received");
    }

    if content.turn_complete {
        info!("Turn complete received from Gemini");
        let closed = ClosedTurn {
            generation: session.hand_off_audio_turn(),
            audio: buffer.take(),
        };
        client.send(ServerMessage::TurnComplete).await?;
        if turn_tx.send(closed).is_err() {
            warn!("Audio finalizer is gone; dropping audio turn");
        }
    }
    Ok(())
}
