//! Minimal client for the Gemini Live bidirectional streaming API.
//!
//! [`LiveClient::connect`] performs the setup handshake and returns a
//! [`LiveSender`] / [`LiveReceiver`] pair over one WebSocket.

pub mod client;
pub mod types;

pub use client::{DEFAULT_ENDPOINT, LiveClient, LiveReceiver, LiveSender};
pub use types::{
    AutomaticActivityDetection, FunctionCall, FunctionDeclaration, FunctionResponse, LiveEvent,
    RealtimeInput, ResponseModality, ServerContent, Setup, Tool, ToolCall,
};
