//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the live WebSocket endpoint and OpenAPI documentation.

use crate::{
    handlers::{self, WelcomeResponse},
    state::AppState,
    ws::ws_handler,
};

use axum::{Router, routing::get};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(handlers::root),
    components(schemas(WelcomeResponse)),
    tags(
        (name = "Gemini Live Avatar API", description = "Live voice sessions with a lip-synced avatar")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/", get(handlers::root))
        .route("/ws/live", get(ws_handler))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/api", api_router)
}
