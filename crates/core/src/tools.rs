//! Tool execution contracts.
//!
//! A [`ToolExecutor`] is an external catalog of callable tools (for example an
//! MCP server). A [`ToolConnector`] knows how to reach one. The built-in
//! fallback table lives in [`crate::builtin`].

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Declaration of a callable tool, independent of any model vendor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

/// An external tool catalog that can execute tools by name.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Declarations of every tool the catalog exposes.
    async fn list_tools(&self) -> Result<Vec<ToolSpec>>;

    /// Names of every tool the catalog exposes.
    async fn list_tool_names(&self) -> Result<HashSet<String>>;

    /// Runs `name` with `args`. Failures are returned, never panicked.
    async fn invoke(&self, name: &str, args: Value) -> Result<Value>;

    /// Releases the catalog connection. Calling it twice is harmless.
    async fn close(&self) -> Result<()>;
}

/// Establishes a connection to an external tool catalog.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait ToolConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn ToolExecutor>>;
}
