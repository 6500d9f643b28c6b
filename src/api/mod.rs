//! Admin HTTP API: route handlers, DTOs, router composition and the
//! OpenAPI document.
//!
//! Served on its own listener, separate from the WebSocket port.

pub mod dto;
pub mod handlers;

use axum::Router;
use utoipa::OpenApi;

use crate::app_state::AppState;

/// OpenAPI document for the admin API.
#[derive(Debug, OpenApi)]
#[openapi(
    info(title = "lobby-gateway admin API"),
    paths(
        handlers::system::health_handler,
        handlers::system::queues_handler,
        handlers::connections::list_connections,
        handlers::connections::get_connection,
    ),
    components(schemas(
        dto::HealthResponse,
        dto::QueueStatus,
        dto::QueueStatusResponse,
        dto::ConnectionDto,
        dto::ConnectionListResponse,
        crate::error::ErrorResponse,
        crate::error::ErrorBody,
    )),
    tags(
        (name = "System", description = "Health and queue status"),
        (name = "Connections", description = "Live WebSocket connections"),
    )
)]
pub struct ApiDoc;

/// Builds the complete admin router.
///
/// With the `swagger-ui` feature the interactive documentation is served
/// at `/swagger-ui`; the raw document is always at `/api-docs/openapi.json`.
pub fn build_router() -> Router<AppState> {
    let router = Router::new().merge(handlers::routes());

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    );

    #[cfg(not(feature = "swagger-ui"))]
    let router = router.route(
        "/api-docs/openapi.json",
        axum::routing::get(|| async { axum::Json(ApiDoc::openapi()) }),
    );

    router
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in ["/health", "/queues", "/connections", "/connections/{id}"] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
