//! Live Session WebSocket
//!
//! This module bridges a browser WebSocket with a Gemini Live session. It is
//! structured into submodules:
//!
//! - `protocol`: The JSON message format between browser and server.
//! - `client` / `upstream`: The two transports a session talks to.
//! - `session`: Connection lifecycle, cancellation scope and teardown.
//! - `pumps`: The client and response message loops.
//! - `dispatch`: The tool-call queue and its single consumer.
//! - `audio`: Audio turn buffering and lip-sync finalization.
//! - `tools`: Tool catalog resolution and upstream setup.

pub mod audio;
pub mod client;
pub mod dispatch;
pub mod errors;
pub mod protocol;
pub mod pumps;
pub mod session;
pub mod state;
pub mod tools;
pub mod upstream;

#[cfg(test)]
pub(crate) mod testing;

pub use session::ws_handler;
