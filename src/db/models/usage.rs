//! Usage ledger model types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// One completed (or failed) extraction attempt as stored in the ledger.
///
/// Costs are stored as REAL columns; exact decimal arithmetic happens before
/// the row is written.
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct UsageRecord {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub filename: Option<String>,
    pub buyer: Option<String>,
    pub template: String,
    pub provider: String,
    pub model: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub prompt_cost: f64,
    pub completion_cost: f64,
    pub total_cost: f64,
    pub success: bool,
    pub error_message: Option<String>,
    pub num_images: i64,
}

/// Payload for appending a ledger row. Token counts come verbatim from the
/// backend; costs are computed with [`Decimal`] and only converted to floats
/// at the column boundary.
#[derive(Debug, Clone)]
pub struct UsageRecordCreate {
    pub filename: Option<String>,
    pub buyer: Option<String>,
    pub template: String,
    pub provider: String,
    pub model: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub prompt_cost: Decimal,
    pub completion_cost: Decimal,
    pub success: bool,
    pub error_message: Option<String>,
    pub num_images: i64,
}

impl UsageRecordCreate {
    pub fn total_tokens(&self) -> i64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn total_cost(&self) -> Decimal {
        self.prompt_cost + self.completion_cost
    }
}

/// Optional filters applied to ledger reads; all conditions are conjunctive
#[derive(Debug, Clone, Default)]
pub struct UsageFilter {
    pub provider: Option<String>,
    pub buyer: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

/// Aggregate totals over the filtered ledger rows
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct UsageStats {
    pub total_requests: i64,
    pub successful_requests: i64,
    pub failed_requests: i64,
    pub total_prompt_tokens: i64,
    pub total_completion_tokens: i64,
    pub total_tokens: i64,
    pub total_cost: f64,
    pub total_images: i64,
}

/// Per-provider aggregate totals
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct ProviderUsage {
    pub provider: String,
    pub total_requests: i64,
    pub total_tokens: i64,
    pub total_cost: f64,
}
