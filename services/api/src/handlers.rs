//! Axum Handlers for the REST API
//!
//! The live session itself runs over the WebSocket in [`crate::ws`]; the plain
//! HTTP surface only greets callers. `utoipa` doc comments feed the OpenAPI
//! document.

use axum::response::Json;
use serde::Serialize;
use utoipa::ToSchema;

/// Greeting returned by the root endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct WelcomeResponse {
    pub message: String,
}

/// Welcome message for the Gemini Live Avatar API.
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service is up", body = WelcomeResponse)
    )
)]
pub async fn root() -> Json<WelcomeResponse> {
    Json(WelcomeResponse {
        message: "Welcome to the Gemini Live Avatar API!".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_root_greets() {
        let Json(body) = root().await;
        assert_eq!(
            serde_json::to_value(body).unwrap(),
            serde_json::json!({"message": "Welcome to the Gemini Live Avatar API!"})
        );
    }
}
