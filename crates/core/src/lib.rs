//! Collaborators of the live avatar service.
//!
//! These are the pieces a live session talks to besides the model itself:
//! tool catalogs (built-in and MCP-backed) and the word-timing aligner that
//! turns finished audio into lip-sync data.

pub mod aligner;
pub mod builtin;
pub mod mcp;
pub mod tools;

pub use aligner::{AlignError, HttpWordAligner, WordAligner, WordTimings};
pub use tools::{ToolConnector, ToolExecutor, ToolSpec};
