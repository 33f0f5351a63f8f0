use axum::{Json, extract::State};

use crate::AppState;
use crate::api::models::HealthResponse;

// GET /health - liveness plus basic configuration echo
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse),
    )
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        provider: state.extractor.provider_name().to_string(),
        model: state.extractor.provider_model(),
        templates: state.extractor.templates().list().len(),
    })
}
