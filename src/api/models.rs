//! Request/response data structures for the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::{IntoParams, ToSchema};

use crate::templates::{FieldKind, Template};

/// Public description of one prompt template
#[derive(Debug, Serialize, ToSchema)]
pub struct TemplateInfo {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub fields: BTreeMap<String, FieldKind>,
}

impl From<&Template> for TemplateInfo {
    fn from(template: &Template) -> Self {
        Self {
            name: template.name.clone(),
            display_name: template.display_name.clone(),
            description: template.description.clone(),
            fields: template.fields.clone(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TemplatesResponse {
    pub templates: Vec<TemplateInfo>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReloadResponse {
    pub reloaded: usize,
}

/// Query parameters for ledger reads. Out-of-range `limit`/`offset` values
/// are rejected with 400, not clamped.
#[derive(Debug, Deserialize, IntoParams)]
pub struct UsageQueryParams {
    /// Page size, 1 to 1000 (default 100)
    pub limit: Option<i64>,
    /// Rows to skip (default 0)
    pub offset: Option<i64>,
    /// Only rows from this provider
    pub provider: Option<String>,
    /// Only rows for this buyer
    pub buyer: Option<String>,
    /// Only rows created at or after this instant
    pub start_date: Option<DateTime<Utc>>,
    /// Only rows created at or before this instant
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub provider: String,
    pub model: String,
    pub templates: usize,
}
