//! Terminal failures of a live session and how they are reported to the client.

use super::protocol::{ErrorType, ServerMessage};
use tokio::time::error::Elapsed;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Timed out waiting for Gemini Live")]
    Timeout,
    #[error("Client transport failed")]
    ClientDisconnected,
}

fn chain_mentions(err: &anyhow::Error, needles: &[&str]) -> bool {
    err.chain().any(|cause| {
        let text = cause.to_string().to_lowercase();
        needles.iter().any(|needle| text.contains(needle))
    })
}

/// True when the failure is just the peer going away.
pub fn is_ordinary_close(err: &anyhow::Error) -> bool {
    chain_mentions(err, &["connection closed"])
}

/// Maps a failure onto the client error taxonomy.
///
/// `None` means the failure is an ordinary close and nothing is reported.
pub fn classify(err: &anyhow::Error) -> Option<ErrorType> {
    if chain_mentions(
        err,
        &["quota exceeded", "resource_exhausted", "exceeded your current quota"],
    ) {
        return Some(ErrorType::QuotaExceeded);
    }
    if is_ordinary_close(err) {
        return None;
    }
    if err.downcast_ref::<Elapsed>().is_some()
        || matches!(err.downcast_ref::<SessionError>(), Some(SessionError::Timeout))
    {
        return Some(ErrorType::Timeout);
    }
    if matches!(
        err.downcast_ref::<SessionError>(),
        Some(SessionError::ClientDisconnected)
    ) {
        return Some(ErrorType::Disconnection);
    }
    Some(ErrorType::General)
}

/// The error event sent for a terminal failure, if any.
pub fn error_event(err: &anyhow::Error) -> Option<ServerMessage> {
    let msg = match classify(err)? {
        ErrorType::Timeout => {
            ServerMessage::error("Session timed out.", Some("Please reconnect."), ErrorType::Timeout)
        }
        ErrorType::Disconnection => ServerMessage::error(
            "Client disconnected.",
            Some("Reconnect to start a new session."),
            ErrorType::Disconnection,
        ),
        ErrorType::QuotaExceeded => ServerMessage::error(
            "Quota exceeded.",
            Some("Please try again later."),
            ErrorType::QuotaExceeded,
        ),
        other => ServerMessage::error(
            format!("Unexpected error occurred. {err}"),
            Some("Try again."),
            other,
        ),
    };
    Some(msg)
}
