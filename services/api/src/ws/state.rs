//! Per-connection session state shared by the pumps, the tool dispatcher and teardown.

use super::upstream::UpstreamSink;
use avatar_core::ToolExecutor;
use std::sync::{
    Arc, Mutex, MutexGuard, OnceLock, PoisonError,
    atomic::{AtomicBool, Ordering},
};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Response flags of the current model turn.
///
/// `generation` counts audio turns opened on this session, so a finished turn
/// can tell whether a newer one has started since it was handed off.
#[derive(Debug, Default)]
struct TurnFlags {
    generation: u64,
    receiving_response: bool,
    received_model_output: bool,
}

pub struct Session {
    pub id: Uuid,
    upstream: OnceLock<Arc<dyn UpstreamSink>>,
    tool_client: OnceLock<Arc<dyn ToolExecutor>>,
    turn: Mutex<TurnFlags>,
    /// The one tool invocation currently running, if any.
    in_flight: Mutex<Option<JoinHandle<()>>>,
    torn_down: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            upstream: OnceLock::new(),
            tool_client: OnceLock::new(),
            turn: Mutex::new(TurnFlags::default()),
            in_flight: Mutex::new(None),
            torn_down: AtomicBool::new(false),
        }
    }

    /// Attaches the upstream stream. Returns false if one was already attached.
    pub fn attach_upstream(&self, upstream: Arc<dyn UpstreamSink>) -> bool {
        self.upstream.set(upstream).is_ok()
    }

    pub fn upstream(&self) -> Option<&Arc<dyn UpstreamSink>> {
        self.upstream.get()
    }

    pub fn attach_tool_client(&self, client: Arc<dyn ToolExecutor>) -> bool {
        self.tool_client.set(client).is_ok()
    }

    pub fn tool_client(&self) -> Option<&Arc<dyn ToolExecutor>> {
        self.tool_client.get()
    }

    pub fn is_receiving_response(&self) -> bool {
        lock(&self.turn).receiving_response
    }

    pub fn has_model_output(&self) -> bool {
        lock(&self.turn).received_model_output
    }

    /// Model output arrived for the current turn.
    pub fn mark_model_output(&self) {
        let mut turn = lock(&self.turn);
        turn.receiving_response = true;
        turn.received_model_output = true;
    }

    pub fn clear_receiving_response(&self) {
        lock(&self.turn).receiving_response = false;
    }

    /// The current turn is over.
    pub fn reset_turn(&self) {
        let mut turn = lock(&self.turn);
        turn.receiving_response = false;
        turn.received_model_output = false;
    }

    /// A new audio turn opened. Returns its generation.
    pub fn open_audio_turn(&self) -> u64 {
        let mut turn = lock(&self.turn);
        turn.generation += 1;
        turn.generation
    }

    /// The turn of `generation` has been handed off for finalization. Model
    /// output is no longer being received for it.
    pub fn hand_off_audio_turn(&self) -> u64 {
        let mut turn = lock(&self.turn);
        turn.received_model_output = false;
        turn.generation
    }

    /// Finalization of the turn handed off at `generation` is done. The
    /// receiving flag is cleared only if no newer turn has opened since.
    pub fn finish_audio_turn(&self, generation: u64) -> bool {
        let mut turn = lock(&self.turn);
        if turn.generation != generation {
            return false;
        }
        turn.receiving_response = false;
        true
    }

    pub fn set_in_flight(&self, handle: JoinHandle<()>) {
        *lock(&self.in_flight) = Some(handle);
    }

    pub fn take_in_flight(&self) -> Option<JoinHandle<()>> {
        lock(&self.in_flight).take()
    }

    pub fn has_in_flight(&self) -> bool {
        lock(&self.in_flight).is_some()
    }

    /// True exactly once: for the caller that gets to run teardown.
    pub fn begin_teardown(&self) -> bool {
        !self.torn_down.swap(true, Ordering::SeqCst)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
