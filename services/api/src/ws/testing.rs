//! Channel-backed fakes of the client and upstream transports.

use super::{
    client::{ClientSink, ClientSource},
    protocol::{ClientMessage, ServerMessage},
    upstream::{UpstreamConnector, UpstreamPair, UpstreamSink, UpstreamSource},
};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use avatar_core::{ToolExecutor, ToolSpec};
use gemini_live::{FunctionResponse, LiveEvent, RealtimeInput, Setup};
use serde_json::Value;
use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::{
    Mutex, Notify,
    mpsc::{self, UnboundedReceiver, UnboundedSender},
};

pub struct FakeClientSink {
    tx: UnboundedSender<ServerMessage>,
}

#[async_trait]
impl ClientSink for FakeClientSink {
    async fn send(&self, msg: ServerMessage) -> Result<()> {
        self.tx
            .send(msg)
            .map_err(|_| anyhow!("fake client receiver dropped"))
    }
}

pub fn client_sink() -> (Arc<FakeClientSink>, UnboundedReceiver<ServerMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(FakeClientSink { tx }), rx)
}

pub struct FakeClientSource {
    rx: UnboundedReceiver<Result<ClientMessage>>,
}

#[async_trait]
impl ClientSource for FakeClientSource {
    async fn recv(&mut self) -> Result<Option<ClientMessage>> {
        self.rx.recv().await.transpose()
    }
}

/// Dropping the sender reads as a client disconnect.
pub fn client_source() -> (UnboundedSender<Result<ClientMessage>>, FakeClientSource) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, FakeClientSource { rx })
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamCall {
    Input(RealtimeInput),
    ToolResponse(Vec<FunctionResponse>),
}

pub struct FakeUpstreamSink {
    tx: UnboundedSender<UpstreamCall>,
    pub closes: AtomicUsize,
}

#[async_trait]
impl UpstreamSink for FakeUpstreamSink {
    async fn send_realtime_input(&self, input: RealtimeInput) -> Result<()> {
        self.tx
            .send(UpstreamCall::Input(input))
            .map_err(|_| anyhow!("fake upstream receiver dropped"))
    }

    async fn send_tool_response(&self, responses: Vec<FunctionResponse>) -> Result<()> {
        self.tx
            .send(UpstreamCall::ToolResponse(responses))
            .map_err(|_| anyhow!("fake upstream receiver dropped"))
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn upstream_sink() -> (Arc<FakeUpstreamSink>, UnboundedReceiver<UpstreamCall>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = FakeUpstreamSink {
        tx,
        closes: AtomicUsize::new(0),
    };
    (Arc::new(sink), rx)
}

pub struct FakeUpstreamSource {
    rx: UnboundedReceiver<Result<LiveEvent>>,
}

#[async_trait]
impl UpstreamSource for FakeUpstreamSource {
    async fn next_event(&mut self) -> Result<Option<LiveEvent>> {
        self.rx.recv().await.transpose()
    }
}

/// Dropping the sender reads as the upstream closing normally.
pub fn upstream_source() -> (UnboundedSender<Result<LiveEvent>>, FakeUpstreamSource) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, FakeUpstreamSource { rx })
}

/// Hands out one prepared upstream pair and records the setup it was given.
pub struct FakeConnector {
    pair: Mutex<Option<UpstreamPair>>,
    pub setups: Mutex<Vec<Setup>>,
}

impl FakeConnector {
    pub fn new(sink: Arc<dyn UpstreamSink>, source: Box<dyn UpstreamSource>) -> Self {
        Self {
            pair: Mutex::new(Some((sink, source))),
            setups: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl UpstreamConnector for FakeConnector {
    async fn connect(&self, setup: Setup) -> Result<UpstreamPair> {
        self.setups.lock().await.push(setup);
        self.pair
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow!("fake connector already used"))
    }
}

/// A tool catalog whose invocations never finish.
pub struct StuckTools {
    pub names: HashSet<String>,
    pub started: Notify,
    pub closes: AtomicUsize,
}

impl StuckTools {
    pub fn new(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|n| n.to_string()).collect(),
            started: Notify::new(),
            closes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ToolExecutor for StuckTools {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>> {
        Ok(Vec::new())
    }

    async fn list_tool_names(&self) -> Result<HashSet<String>> {
        Ok(self.names.clone())
    }

    async fn invoke(&self, _name: &str, _args: Value) -> Result<Value> {
        self.started.notify_one();
        std::future::pending().await
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Receives the next message or fails the test after two seconds.
pub async fn next<T>(rx: &mut UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("channel closed")
}

/// Asserts nothing else arrives within a short grace period.
pub async fn assert_quiet<T: std::fmt::Debug>(rx: &mut UnboundedReceiver<T>) {
    if let Ok(Some(extra)) = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
        panic!("unexpected message: {extra:?}");
    }
}
