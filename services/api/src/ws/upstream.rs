//! The model side of a session.
//!
//! The orchestrator only sees these traits; [`GeminiConnector`] binds them to
//! the Gemini Live client.

use anyhow::Result;
use async_trait::async_trait;
use gemini_live::{FunctionResponse, LiveClient, LiveEvent, LiveReceiver, LiveSender, RealtimeInput, Setup};
use std::sync::Arc;

/// Write half of the upstream stream. Safe to call from several tasks at once.
#[async_trait]
pub trait UpstreamSink: Send + Sync {
    async fn send_realtime_input(&self, input: RealtimeInput) -> Result<()>;
    async fn send_tool_response(&self, responses: Vec<FunctionResponse>) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

/// Read half of the upstream stream. `Ok(None)` once the stream has ended.
#[async_trait]
pub trait UpstreamSource: Send {
    async fn next_event(&mut self) -> Result<Option<LiveEvent>>;
}

pub type UpstreamPair = (Arc<dyn UpstreamSink>, Box<dyn UpstreamSource>);

#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    async fn connect(&self, setup: Setup) -> Result<UpstreamPair>;
}

#[async_trait]
impl UpstreamSink for LiveSender {
    async fn send_realtime_input(&self, input: RealtimeInput) -> Result<()> {
        LiveSender::send_realtime_input(self, input).await
    }

    async fn send_tool_response(&self, responses: Vec<FunctionResponse>) -> Result<()> {
        LiveSender::send_tool_response(self, responses).await
    }

    async fn close(&self) -> Result<()> {
        LiveSender::close(self).await
    }
}

#[async_trait]
impl UpstreamSource for LiveReceiver {
    async fn next_event(&mut self) -> Result<Option<LiveEvent>> {
        LiveReceiver::next_event(self).await
    }
}

pub struct GeminiConnector {
    client: LiveClient,
}

impl GeminiConnector {
    pub fn new(api_key: &str, endpoint: Option<&str>) -> Self {
        let client = LiveClient::new(api_key);
        let client = match endpoint {
            Some(endpoint) => client.with_endpoint(endpoint),
            None => client,
        };
        Self { client }
    }
}

#[async_trait]
impl UpstreamConnector for GeminiConnector {
    async fn connect(&self, setup: Setup) -> Result<UpstreamPair> {
        let (sender, receiver) = self.client.connect(setup).await?;
        Ok((Arc::new(sender), Box::new(receiver)))
    }
}
