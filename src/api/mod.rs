//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers for all endpoints
//! - **[`models`]**: Request/response data structures
//!
//! All endpoints carry OpenAPI annotations via `utoipa`; interactive
//! documentation is served at `/docs`.

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::AppState;

pub mod handlers;
pub mod models;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health,
        handlers::process::process_document,
        handlers::templates::list_templates,
        handlers::templates::reload_templates,
        handlers::usage::get_usage,
    ),
    components(schemas(
        crate::extraction::ExtractionResult,
        crate::extraction::UsageSummary,
        crate::extraction::UsagePage,
        crate::db::models::usage::UsageRecord,
        crate::db::models::usage::UsageStats,
        crate::db::models::usage::ProviderUsage,
        crate::templates::FieldKind,
        models::TemplateInfo,
        models::TemplatesResponse,
        models::ReloadResponse,
        models::HealthResponse,
    )),
    tags(
        (name = "extraction", description = "Document extraction"),
        (name = "templates", description = "Prompt template management"),
        (name = "usage", description = "Usage ledger queries"),
        (name = "health", description = "Service health"),
    ),
    info(
        title = "papertrail",
        description = "Invoice and receipt extraction service backed by vision-language models"
    )
)]
pub struct ApiDoc;

/// Build the application router.
///
/// `max_body_size` bounds the multipart body; the exact per-file ceiling is
/// enforced again by preprocessing so oversized uploads get a precise error.
pub fn router(state: AppState, max_body_size: usize) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/api/v1/process", post(handlers::process::process_document))
        .route("/api/v1/templates", get(handlers::templates::list_templates))
        .route("/api/v1/templates/reload", post(handlers::templates::reload_templates))
        .route("/api/v1/usage", get(handlers::usage::get_usage))
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
