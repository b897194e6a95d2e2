//! MCP-backed tool catalog.
//!
//! The catalog is a Model Context Protocol server spawned as a child process
//! and spoken to over stdio with `rmcp`. Server definitions use the common
//! `mcpServers` JSON layout.

use crate::tools::{ToolConnector, ToolExecutor, ToolSpec};
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use rmcp::{
    ServiceExt,
    model::{CallToolRequestParam, RawContent},
    service::{Peer, RoleClient, RunningService},
    transport::TokioChildProcess,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// How to launch one MCP server.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum McpConfigFile {
    Servers {
        #[serde(rename = "mcpServers")]
        servers: BTreeMap<String, McpServerConfig>,
    },
    Single(McpServerConfig),
}

impl McpServerConfig {
    /// Reads a server definition file. With several `mcpServers` entries the
    /// first by name is used.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read MCP config {}", path.display()))?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        match serde_json::from_str::<McpConfigFile>(raw).context("Invalid MCP config")? {
            McpConfigFile::Single(server) => Ok(server),
            McpConfigFile::Servers { servers } => {
                if servers.len() > 1 {
                    warn!(
                        servers = ?servers.keys().collect::<Vec<_>>(),
                        "Several MCP servers configured; only the first is used"
                    );
                }
                let (name, server) = servers
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow!("MCP config lists no servers"))?;
                info!(server = %name, "Selected MCP server");
                Ok(server)
            }
        }
    }
}

/// Connects to the MCP server described by a config file.
#[derive(Debug, Clone)]
pub struct McpConnector {
    config_path: PathBuf,
}

impl McpConnector {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }
}

#[async_trait]
impl ToolConnector for McpConnector {
    async fn connect(&self) -> Result<Arc<dyn ToolExecutor>> {
        let config = McpServerConfig::from_json_file(&self.config_path)?;
        Ok(Arc::new(McpToolClient::spawn(&config).await?))
    }
}

/// A running MCP client session with its tool list cached at connect time.
pub struct McpToolClient {
    peer: Peer<RoleClient>,
    service: Mutex<Option<RunningService<RoleClient, ()>>>,
    tools: Vec<ToolSpec>,
}

impl McpToolClient {
    pub async fn spawn(config: &McpServerConfig) -> Result<Self> {
        let mut command = tokio::process::Command::new(&config.command);
        command.args(&config.args).envs(&config.env);
        let transport = TokioChildProcess::new(command)
            .with_context(|| format!("Failed to spawn MCP server `{}`", config.command))?;
        let service = ().serve(transport).await?;

        let tools = service
            .list_all_tools()
            .await?
            .into_iter()
            .map(|t| ToolSpec {
                name: t.name.to_string(),
                description: t.description.map(|d| d.to_string()).unwrap_or_default(),
                parameters: Value::Object((*t.input_schema).clone()),
            })
            .collect::<Vec<_>>();
        info!(
            tools = ?tools.iter().map(|t| &t.name).collect::<Vec<_>>(),
            "Connected to MCP server"
        );

        Ok(Self {
            peer: service.peer().clone(),
            service: Mutex::new(Some(service)),
            tools,
        })
    }
}

#[async_trait]
impl ToolExecutor for McpToolClient {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>> {
        Ok(self.tools.clone())
    }

    async fn list_tool_names(&self) -> Result<HashSet<String>> {
        Ok(self.tools.iter().map(|t| t.name.clone()).collect())
    }

    async fn invoke(&self, name: &str, args: Value) -> Result<Value> {
        info!(name, %args, "Executing MCP tool");
        let arguments = match args {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => bail!("Tool arguments must be an object, got {other}"),
        };
        let result = self
            .peer
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments,
            })
            .await?;

        if let Some(structured) = result.structured_content {
            return Ok(structured);
        }
        let text = result
            .content
            .context("Tool call returned no content")?
            .into_iter()
            .filter_map(|content| match content.raw {
                RawContent::Text(text_content) => Some(text_content.text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        if result.is_error == Some(true) {
            bail!("{text}");
        }
        Ok(Value::String(text))
    }

    async fn close(&self) -> Result<()> {
        if let Some(service) = self.service.lock().await.take() {
            let reason = service.cancel().await?;
            info!(?reason, "MCP client closed");
        }
        Ok(())
    }
}
