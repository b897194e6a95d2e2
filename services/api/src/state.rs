//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the process-wide
//! resources every live session needs, plus the lifecycle handles used to
//! stop all sessions at shutdown.

use crate::{config::Config, registry::SessionRegistry, ws::upstream::UpstreamConnector};
use avatar_core::WordAligner;
use std::sync::Arc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// The shared application state, created once at startup and passed to all handlers.
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
    pub system_instruction: Arc<String>,
    pub upstream: Arc<dyn UpstreamConnector>,
    pub aligner: Arc<dyn WordAligner>,
    /// Cancelled once at shutdown; every session scope is a child of it.
    pub cancel: CancellationToken,
    /// Tracks every running session so shutdown can wait for their teardown.
    pub tasks: TaskTracker,
}

impl AppState {
    pub fn new(
        config: Config,
        system_instruction: String,
        upstream: Arc<dyn UpstreamConnector>,
        aligner: Arc<dyn WordAligner>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(SessionRegistry::new()),
            system_instruction: Arc::new(system_instruction),
            upstream,
            aligner,
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Cancels every session and waits until all of them have torn down.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }
}
