use axum::{Json, extract::State};

use crate::AppState;
use crate::api::models::{ReloadResponse, TemplateInfo, TemplatesResponse};
use crate::errors::Result;

// GET /api/v1/templates - list loaded prompt templates
#[utoipa::path(
    get,
    path = "/api/v1/templates",
    tag = "templates",
    responses(
        (status = 200, description = "Loaded templates", body = TemplatesResponse),
    )
)]
pub async fn list_templates(State(state): State<AppState>) -> Json<TemplatesResponse> {
    let templates = state
        .extractor
        .templates()
        .list()
        .iter()
        .map(|t| TemplateInfo::from(t.as_ref()))
        .collect();
    Json(TemplatesResponse { templates })
}

// POST /api/v1/templates/reload - re-read the templates file
#[utoipa::path(
    post,
    path = "/api/v1/templates/reload",
    tag = "templates",
    responses(
        (status = 200, description = "Templates reloaded", body = ReloadResponse),
        (status = 500, description = "Templates file missing or invalid; previous set kept"),
    )
)]
pub async fn reload_templates(State(state): State<AppState>) -> Result<Json<ReloadResponse>> {
    let reloaded = state.extractor.templates().reload()?;
    Ok(Json(ReloadResponse { reloaded }))
}
