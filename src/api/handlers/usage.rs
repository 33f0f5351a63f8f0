use axum::{
    Json,
    extract::{Query, State},
};

use crate::AppState;
use crate::api::models::UsageQueryParams;
use crate::db::models::usage::UsageFilter;
use crate::errors::Result;
use crate::extraction::UsagePage;

// GET /api/v1/usage - filtered, paginated ledger read with aggregates
#[utoipa::path(
    get,
    path = "/api/v1/usage",
    tag = "usage",
    params(UsageQueryParams),
    responses(
        (status = 200, description = "Ledger page with aggregate stats", body = UsagePage),
        (status = 400, description = "limit/offset out of range"),
    )
)]
pub async fn get_usage(
    State(state): State<AppState>,
    Query(params): Query<UsageQueryParams>,
) -> Result<Json<UsagePage>> {
    let filter = UsageFilter {
        provider: params.provider,
        buyer: params.buyer,
        start_date: params.start_date,
        end_date: params.end_date,
    };

    let page = state
        .extractor
        .query_usage(filter, params.limit.unwrap_or(100), params.offset.unwrap_or(0))
        .await?;
    Ok(Json(page))
}
