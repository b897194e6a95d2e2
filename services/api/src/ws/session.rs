//! Manages the lifecycle of one live avatar session.
//!
//! Accept, config handshake, tool catalog, upstream connect, then both pumps
//! under one cancellation scope. Whatever ends the session, at most one error
//! event is reported and teardown runs exactly once.

use super::{
    client::{ClientSink, ClientSource, send_best_effort, split_socket},
    errors::{self, SessionError},
    protocol::ServerMessage,
    pumps::{ResponseContext, client_pump, response_pump},
    state::Session,
    tools::{build_setup, resolve_tools},
    upstream::UpstreamSource,
};
use crate::{config::RuntimeConfig, registry::SessionRegistry, state::AppState};
use anyhow::{Context, Result};
use avatar_core::{ToolConnector, mcp::McpConnector};
use axum::{
    extract::{
        State,
        ws::{WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

/// Axum handler to upgrade an HTTP connection to a live session.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (sink, source) = split_socket(socket);
    let tasks = state.tasks.clone();
    tasks
        .track_future(run_session(state, Arc::new(sink), Box::new(source)))
        .await;
}

/// Runs one session to completion over an accepted client connection.
pub async fn run_session(
    state: Arc<AppState>,
    client: Arc<dyn ClientSink>,
    source: Box<dyn ClientSource>,
) {
    let session = Arc::new(Session::new());
    let span = info_span!("live_session", session_id = %session.id);

    async move {
        state.registry.insert(session.clone()).await;
        info!("WebSocket connection accepted");

        let scope = state.cancel.child_token();
        if let Err(e) = drive(&state, &session, client.clone(), source, &scope).await {
            match errors::error_event(&e) {
                Some(event) => {
                    error!(error = ?e, "Session terminated with error");
                    send_best_effort(client.as_ref(), event).await;
                }
                None => info!("Connection closed"),
            }
        }
        teardown(&state.registry, &session).await;
    }
    .instrument(span)
    .await
}

async fn drive(
    state: &AppState,
    session: &Arc<Session>,
    client: Arc<dyn ClientSink>,
    source: Box<dyn ClientSource>,
    scope: &CancellationToken,
) -> Result<()> {
    let runtime = RuntimeConfig::load(&state.config.runtime_config_path)
        .context("Failed to load runtime config")?;

    client
        .send(ServerMessage::Config {
            tts_apikey: state.config.tts_api_key.clone(),
            tts_lang: runtime.tts_lang.clone(),
            tts_voice: runtime.tts_voice.clone(),
            avatar_path: runtime.avatar_path.clone(),
        })
        .await?;

    let upstream = tokio::select! {
        () = scope.cancelled() => return Ok(()),
        upstream = open_upstream(state, session, &runtime, client.as_ref()) => upstream?,
    };

    let ctx = ResponseContext {
        session: session.clone(),
        client,
        modality: runtime.response_modality,
        aligner: state.aligner.clone(),
    };
    run_scope(session, source, upstream, ctx, scope).await
}

/// Resolves tools and connects upstream. Both end up owned by the session.
async fn open_upstream(
    state: &AppState,
    session: &Session,
    runtime: &RuntimeConfig,
    client: &dyn ClientSink,
) -> Result<Box<dyn UpstreamSource>> {
    let connector = runtime
        .mcp_server_config
        .clone()
        .map(|path| Arc::new(McpConnector::new(path)) as Arc<dyn ToolConnector>);
    let catalog = resolve_tools(runtime, connector, client).await;
    if let Some(executor) = catalog.executor {
        session.attach_tool_client(executor);
    }

    info!(model = %runtime.model_name, modality = ?runtime.response_modality, "Creating session with Gemini Live");
    let setup = build_setup(runtime, &state.system_instruction, catalog.tools);
    let (sink, source) = tokio::time::timeout(
        state.config.upstream_connect_timeout,
        state.upstream.connect(setup),
    )
    .await
    .map_err(|_| SessionError::Timeout)?
    .context("Failed to connect to Gemini Live")?;

    session.attach_upstream(sink);
    info!("Gemini Live session established");
    Ok(source)
}

/// Runs both pumps until the first one finishes, then cancels the other.
/// The first failure, if any, is the session's terminal error.
pub(crate) async fn run_scope(
    session: &Arc<Session>,
    source: Box<dyn ClientSource>,
    upstream: Box<dyn UpstreamSource>,
    ctx: ResponseContext,
    scope: &CancellationToken,
) -> Result<()> {
    let mut pumps = JoinSet::new();
    pumps.spawn(client_pump(session.clone(), source, scope.clone()).in_current_span());
    pumps.spawn(response_pump(ctx, upstream, scope.clone()).in_current_span());

    let mut terminal = None;
    while let Some(joined) = pumps.join_next().await {
        scope.cancel();
        let outcome = joined.context("Session pump panicked").and_then(|result| result);
        if let Err(e) = outcome {
            if terminal.is_none() {
                terminal = Some(e);
            } else {
                warn!(error = ?e, "Further pump failure after session scope ended");
            }
        }
    }
    terminal.map_or(Ok(()), Err)
}

/// Releases everything the session owns. Only the first call does anything.
pub(crate) async fn teardown(registry: &SessionRegistry, session: &Session) {
    if !session.begin_teardown() {
        return;
    }

    if let Some(handle) = session.take_in_flight() {
        handle.abort();
        match handle.await {
            Err(e) if e.is_panic() => error!(error = ?e, "Tool execution panicked"),
            _ => info!("Cancelled in-flight tool execution"),
        }
    }

    if let Some(upstream) = session.upstream() {
        if let Err(e) = upstream.close().await {
            error!(error = ?e, "Error closing Gemini session");
        }
    }

    if let Some(tools) = session.tool_client() {
        if let Err(e) = tools.close().await {
            error!(error = ?e, "Error closing MCP session");
        }
    }

    registry.remove(session.id).await;
    info!("Session cleaned up.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{Config, Modality},
        ws::{
            protocol::{ClientMessage, ErrorType},
            testing::{self, UpstreamCall},
            upstream::{UpstreamConnector, UpstreamPair},
        },
    };
    use anyhow::anyhow;
    use async_trait::async_trait;
    use avatar_core::aligner::MockWordAligner;
    use gemini_live::{FunctionCall, LiveEvent, RealtimeInput, Setup, ToolCall};
    use serde_json::json;
    use std::{io::Write, path::PathBuf, sync::atomic::Ordering, time::Duration};
    use tempfile::NamedTempFile;
    use tracing::Level;

    fn runtime_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{contents}").unwrap();
        file
    }

    fn app_state(runtime: &NamedTempFile, upstream: Arc<dyn UpstreamConnector>) -> Arc<AppState> {
        let config = Config {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            gemini_api_key: "test-key".into(),
            gemini_live_url: None,
            tts_api_key: Some("tts-key".into()),
            log_level: Level::INFO,
            runtime_config_path: runtime.path().to_path_buf(),
            prompts_path: PathBuf::from("./prompts"),
            aligner_url: "http://127.0.0.1:9/align".into(),
            aligner_timeout: Duration::from_secs(5),
            upstream_connect_timeout: Duration::from_millis(200),
        };
        Arc::new(AppState::new(
            config,
            "Be brief.".into(),
            upstream,
            Arc::new(MockWordAligner::new()),
        ))
    }

    struct NeverConnects;

    #[async_trait]
    impl UpstreamConnector for NeverConnects {
        async fn connect(&self, _setup: Setup) -> Result<UpstreamPair> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_unreachable_catalog_session_continues_with_builtins() {
        let runtime = runtime_file(
            r#"{"response_modality": "text", "mcp_server_config": "/no/such/mcp.json", "tts_lang": "de-DE"}"#,
        );
        let (upstream_sink, mut upstream_rx) = testing::upstream_sink();
        let (events, upstream_source) = testing::upstream_source();
        let connector = Arc::new(testing::FakeConnector::new(
            upstream_sink.clone(),
            Box::new(upstream_source),
        ));
        let state = app_state(&runtime, connector.clone());
        let (client, mut client_rx) = testing::client_sink();
        let (client_tx, source) = testing::client_source();

        let session = tokio::spawn(run_session(state.clone(), client, Box::new(source)));

        match testing::next(&mut client_rx).await {
            ServerMessage::Config {
                tts_apikey,
                tts_lang,
                ..
            } => {
                assert_eq!(tts_apikey.as_deref(), Some("tts-key"));
                assert_eq!(tts_lang, "de-DE");
            }
            other => panic!("unexpected message: {other:?}"),
        }
        match testing::next(&mut client_rx).await {
            ServerMessage::Error { data } => {
                assert_eq!(data.error_type, Some(ErrorType::McpConnection))
            }
            other => panic!("unexpected message: {other:?}"),
        }

        client_tx.send(Ok(ClientMessage::Text("hi".into()))).unwrap();
        assert_eq!(
            testing::next(&mut upstream_rx).await,
            UpstreamCall::Input(RealtimeInput::text("hi"))
        );
        let setups = connector.setups.lock().await;
        let declared = serde_json::to_value(&setups[0].tools).unwrap();
        assert_eq!(
            declared[0]["functionDeclarations"][0]["name"],
            "turn_on_the_lights"
        );
        assert_eq!(declared.as_array().unwrap().len(), 1);
        drop(setups);
        assert_eq!(state.registry.len().await, 1);

        drop(client_tx);
        session.await.unwrap();

        testing::assert_quiet(&mut client_rx).await;
        assert_eq!(upstream_sink.closes.load(Ordering::SeqCst), 1);
        assert!(state.registry.is_empty().await);
        drop(events);
    }

    #[tokio::test]
    async fn test_connect_timeout_reports_timeout() {
        let runtime = runtime_file("{}");
        let state = app_state(&runtime, Arc::new(NeverConnects));
        let (client, mut client_rx) = testing::client_sink();
        let (_client_tx, source) = testing::client_source();

        run_session(state.clone(), client, Box::new(source)).await;

        assert!(matches!(
            testing::next(&mut client_rx).await,
            ServerMessage::Config { .. }
        ));
        assert_eq!(
            testing::next(&mut client_rx).await,
            ServerMessage::error("Session timed out.", Some("Please reconnect."), ErrorType::Timeout)
        );
        assert!(state.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_upstream_failure_reported_once() {
        let runtime = runtime_file(r#"{"response_modality": "text"}"#);
        let (upstream_sink, _upstream_rx) = testing::upstream_sink();
        let (events, upstream_source) = testing::upstream_source();
        let connector = Arc::new(testing::FakeConnector::new(
            upstream_sink.clone(),
            Box::new(upstream_source),
        ));
        let state = app_state(&runtime, connector);
        let (client, mut client_rx) = testing::client_sink();
        let (_client_tx, source) = testing::client_source();

        let session = tokio::spawn(run_session(state.clone(), client, Box::new(source)));
        assert!(matches!(
            testing::next(&mut client_rx).await,
            ServerMessage::Config { .. }
        ));
        events
            .send(Err(anyhow!("Gemini Live closed the session (code 1011: Quota exceeded)")))
            .unwrap();
        session.await.unwrap();

        match testing::next(&mut client_rx).await {
            ServerMessage::Error { data } => {
                assert_eq!(data.error_type, Some(ErrorType::QuotaExceeded))
            }
            other => panic!("unexpected message: {other:?}"),
        }
        testing::assert_quiet(&mut client_rx).await;
        assert_eq!(upstream_sink.closes.load(Ordering::SeqCst), 1);
        assert!(state.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_process_shutdown_ends_sessions() {
        let runtime = runtime_file(r#"{"response_modality": "text"}"#);
        let (upstream_sink, mut upstream_rx) = testing::upstream_sink();
        let (_events, upstream_source) = testing::upstream_source();
        let connector = Arc::new(testing::FakeConnector::new(
            upstream_sink.clone(),
            Box::new(upstream_source),
        ));
        let state = app_state(&runtime, connector);
        let (client, mut client_rx) = testing::client_sink();
        let (client_tx, source) = testing::client_source();

        let tracked = state
            .tasks
            .spawn(run_session(state.clone(), client, Box::new(source)));
        assert!(matches!(
            testing::next(&mut client_rx).await,
            ServerMessage::Config { .. }
        ));
        client_tx.send(Ok(ClientMessage::End)).unwrap();
        client_tx.send(Ok(ClientMessage::Text("still there?".into()))).unwrap();
        assert_eq!(
            testing::next(&mut upstream_rx).await,
            UpstreamCall::Input(RealtimeInput::text("still there?"))
        );

        tokio::time::timeout(Duration::from_secs(2), state.shutdown())
            .await
            .expect("sessions should stop on shutdown");
        tracked.await.unwrap();

        assert_eq!(upstream_sink.closes.load(Ordering::SeqCst), 1);
        assert!(state.registry.is_empty().await);
        testing::assert_quiet(&mut client_rx).await;
    }

    #[tokio::test]
    async fn test_cancel_with_tool_in_flight_tears_down_once() {
        let registry = SessionRegistry::new();
        let session = Arc::new(Session::new());
        registry.insert(session.clone()).await;
        let tools = Arc::new(testing::StuckTools::new(&["slow"]));
        let (upstream_sink, _upstream_rx) = testing::upstream_sink();
        session.attach_upstream(upstream_sink.clone());
        session.attach_tool_client(tools.clone());

        let (client, _client_rx) = testing::client_sink();
        let (_client_tx, source) = testing::client_source();
        let (events, upstream_source) = testing::upstream_source();
        let mut aligner = MockWordAligner::new();
        aligner.expect_align().never();
        let ctx = ResponseContext {
            session: session.clone(),
            client,
            modality: Modality::Audio,
            aligner: Arc::new(aligner),
        };
        let scope = CancellationToken::new();
        let running = {
            let session = session.clone();
            let scope = scope.clone();
            tokio::spawn(async move {
                run_scope(&session, Box::new(source), Box::new(upstream_source), ctx, &scope).await
            })
        };

        events
            .send(Ok(LiveEvent::ToolCall(ToolCall {
                function_calls: vec![FunctionCall {
                    id: Some("1".into()),
                    name: "slow".into(),
                    args: json!({}),
                }],
            })))
            .unwrap();
        tools.started.notified().await;
        while !session.has_in_flight() {
            tokio::task::yield_now().await;
        }

        scope.cancel();
        running.await.unwrap().unwrap();
        teardown(&registry, &session).await;
        teardown(&registry, &session).await;

        assert!(!session.has_in_flight());
        assert_eq!(upstream_sink.closes.load(Ordering::SeqCst), 1);
        assert_eq!(tools.closes.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty().await);
    }
}
