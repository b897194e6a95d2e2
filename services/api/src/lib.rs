//! Gemini Live Avatar API Library Crate
//!
//! This library contains the web service that bridges browser clients to
//! Gemini Live: configuration, the session registry, the live WebSocket
//! orchestration, and routing. The `api` binary is a thin wrapper around it.

pub mod audio_utils;
pub mod config;
pub mod handlers;
pub mod registry;
pub mod router;
pub mod state;
pub mod ws;
