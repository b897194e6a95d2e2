//! Tool catalog resolution and upstream session setup.

use super::{
    client::{ClientSink, send_best_effort},
    protocol::{ErrorType, ServerMessage},
};
use crate::config::RuntimeConfig;
use avatar_core::{ToolConnector, ToolExecutor, ToolSpec, builtin};
use gemini_live::{AutomaticActivityDetection, FunctionDeclaration, Setup, Tool};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};

/// Schema keywords Gemini rejects in function declarations.
const UNSUPPORTED_SCHEMA_KEYS: [&str; 2] = ["$schema", "additionalProperties"];

/// The tools a session declares upstream, plus the external catalog backing some of them.
pub struct ToolCatalog {
    pub executor: Option<Arc<dyn ToolExecutor>>,
    pub tools: Vec<Tool>,
}

impl ToolCatalog {
    pub fn names(&self) -> Vec<String> {
        self.tools
            .iter()
            .flat_map(|tool| tool.function_declarations.iter())
            .map(|decl| decl.name.clone())
            .collect()
    }
}

/// Built-in tools, then any tools of the external catalog, with Google Search
/// first when grounding is on. A catalog that cannot be reached is reported to
/// the client and skipped.
pub async fn resolve_tools(
    runtime: &RuntimeConfig,
    connector: Option<Arc<dyn ToolConnector>>,
    client: &dyn ClientSink,
) -> ToolCatalog {
    let mut tools = vec![Tool::functions(declarations(builtin::builtin_tools()))];
    let mut executor = None;

    if let Some(connector) = connector {
        info!("MCP Server configuration found. Initializing MCP client.");
        match load_external(connector.as_ref()).await {
            Ok((catalog, specs)) => {
                let names: Vec<_> = specs.iter().map(|s| s.name.clone()).collect();
                info!(tools = ?names, "Using MCP tools");
                if !specs.is_empty() {
                    tools.push(Tool::functions(declarations(specs)));
                }
                executor = Some(catalog);
                send_best_effort(
                    client,
                    ServerMessage::debug(
                        format!("✅ MCP server tools loaded successfully. Available tools: {names:?}"),
                        Some("You can now use the available tools."),
                    ),
                )
                .await;
            }
            Err(e) => {
                error!(error = ?e, "Failed to load MCP server tools.");
                send_best_effort(
                    client,
                    ServerMessage::error(
                        format!("❌ Failed to load MCP server tools: {e}"),
                        Some("Please check your server configuration."),
                        ErrorType::McpConnection,
                    ),
                )
                .await;
            }
        }
    }

    if runtime.google_search_grounding {
        info!("Google Search Grounding enabled.");
        tools.insert(0, Tool::google_search());
    }

    ToolCatalog { executor, tools }
}

async fn load_external(
    connector: &dyn ToolConnector,
) -> anyhow::Result<(Arc<dyn ToolExecutor>, Vec<ToolSpec>)> {
    let catalog = connector.connect().await?;
    match catalog.list_tools().await {
        Ok(specs) => Ok((catalog, specs)),
        Err(e) => {
            if let Err(close_err) = catalog.close().await {
                error!(error = ?close_err, "Error closing MCP session");
            }
            Err(e)
        }
    }
}

fn declarations(specs: Vec<ToolSpec>) -> Vec<FunctionDeclaration> {
    specs
        .into_iter()
        .map(|spec| FunctionDeclaration {
            name: spec.name,
            description: spec.description,
            parameters: sanitize_schema(spec.parameters),
        })
        .collect()
}

/// Recursively removes schema keywords the upstream does not accept.
pub fn sanitize_schema(schema: Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(key, _)| !UNSUPPORTED_SCHEMA_KEYS.contains(&key.as_str()))
                .map(|(key, value)| (key, sanitize_schema(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_schema).collect()),
        other => other,
    }
}

/// The setup message for a new upstream session.
pub fn build_setup(runtime: &RuntimeConfig, system_instruction: &str, tools: Vec<Tool>) -> Setup {
    Setup::new(&runtime.model_name, runtime.response_modality.into())
        .with_voice(&runtime.voice_name)
        .with_system_instruction(system_instruction)
        .with_tools(tools)
        .with_activity_detection(AutomaticActivityDetection::default())
        .with_output_transcription()
}
