//! Extraction orchestration: upload in, validated fields plus a ledger row out.
//!
//! The pipeline is template lookup, prompt rendering, preprocessing (on the
//! blocking pool), model invocation, parsing, validation, and finally the
//! ledger append. Invocation and recording run inside a spawned task so a
//! client that disconnects mid-request cannot cancel the billing write:
//! tokens billed by the backend are recorded even when nobody is waiting for
//! the answer.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use serde_json::Value;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{error, instrument};
use utoipa::ToSchema;

use crate::config::LimitsConfig;
use crate::db::handlers::usage::UsageLedger;
use crate::db::models::usage::{ProviderUsage, UsageFilter, UsageRecord, UsageRecordCreate, UsageStats};
use crate::errors::{Error, Result};
use crate::preprocess::{DocumentKind, PageImage, preprocess};
use crate::providers::{ModelInvocation, VisionProvider};
use crate::templates::{PromptContext, Template, TemplateRegistry};

pub mod parse;
pub mod validate;

/// One upload ready for processing
#[derive(Debug)]
pub struct ExtractionRequest {
    pub bytes: Vec<u8>,
    pub kind: DocumentKind,
    pub filename: Option<String>,
    pub buyer: Option<String>,
    pub template: String,
}

/// Token and cost totals for one extraction, echoed to the caller
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UsageSummary {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub total_cost: f64,
}

/// Outcome of one extraction. `success` reflects whether a JSON object was
/// parsed out of the model text; validation findings are reported in
/// `validation_errors`/`validation_warnings` and never flip it. The raw model
/// text is always preserved so nothing is lost when parsing fails.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ExtractionResult {
    pub success: bool,
    #[schema(value_type = Option<Object>)]
    pub data: Option<Value>,
    pub error: Option<String>,
    pub raw_response: Option<String>,
    pub validation_errors: Vec<String>,
    pub validation_warnings: Vec<String>,
    pub usage: UsageSummary,
}

/// One page of ledger rows with aggregate context
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UsagePage {
    pub records: Vec<UsageRecord>,
    pub stats: UsageStats,
    pub provider_breakdown: Vec<ProviderUsage>,
    pub total_records: i64,
    pub limit: i64,
    pub offset: i64,
}

/// The extraction service facade shared across request handlers
#[derive(Clone)]
pub struct Extractor {
    templates: Arc<TemplateRegistry>,
    provider: Arc<dyn VisionProvider>,
    db: SqlitePool,
    limits: LimitsConfig,
}

impl Extractor {
    pub fn new(
        templates: Arc<TemplateRegistry>,
        provider: Arc<dyn VisionProvider>,
        db: SqlitePool,
        limits: LimitsConfig,
    ) -> Self {
        Self {
            templates,
            provider,
            db,
            limits,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub fn provider_model(&self) -> String {
        self.provider.model().to_string()
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    pub fn max_file_size(&self) -> usize {
        self.limits.max_file_size()
    }

    /// Run the full extraction pipeline for one upload.
    #[instrument(skip(self, request), fields(template = %request.template, filename = request.filename.as_deref()))]
    pub async fn process(&self, request: ExtractionRequest) -> Result<ExtractionResult> {
        let template = self.templates.get(&request.template)?;
        let prompt = template.render(&PromptContext {
            buyer: request.buyer.as_deref(),
            today: Utc::now().date_naive(),
        });

        // Image decoding and PDF rasterization are CPU-bound
        let limits = self.limits.clone();
        let kind = request.kind;
        let bytes = request.bytes;
        let pages = tokio::task::spawn_blocking(move || preprocess(&bytes, kind, &limits))
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("preprocessing task panicked: {e}")))??;

        // Detached task: the backend bills tokens the moment it answers, so
        // the ledger write must survive the HTTP caller disconnecting.
        let worker = self.clone();
        tokio::spawn(async move {
            worker
                .invoke_and_record(&template, prompt, pages, request.filename, request.buyer)
                .await
        })
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("extraction task panicked: {e}")))?
    }

    async fn invoke_and_record(
        &self,
        template: &Template,
        prompt: crate::templates::RenderedPrompt,
        pages: Vec<PageImage>,
        filename: Option<String>,
        buyer: Option<String>,
    ) -> Result<ExtractionResult> {
        let num_images = pages.len() as i64;

        let invocations = if self.provider.batches_pages() {
            match self.provider.invoke(&prompt, &pages).await {
                Ok(invocation) => vec![invocation],
                Err(e) => {
                    self.record_failure(template, &filename, &buyer, num_images, 0, 0, &e.to_string())
                        .await;
                    return Err(e.into());
                }
            }
        } else {
            // One request per page; a mid-document failure still records the
            // tokens already consumed by earlier pages
            let mut invocations: Vec<ModelInvocation> = Vec::with_capacity(pages.len());
            for page in &pages {
                match self.provider.invoke(&prompt, std::slice::from_ref(page)).await {
                    Ok(invocation) => invocations.push(invocation),
                    Err(e) => {
                        let prompt_tokens: i64 = invocations.iter().map(|i| i.prompt_tokens).sum();
                        let completion_tokens: i64 = invocations.iter().map(|i| i.completion_tokens).sum();
                        self.record_failure(
                            template,
                            &filename,
                            &buyer,
                            num_images,
                            prompt_tokens,
                            completion_tokens,
                            &e.to_string(),
                        )
                        .await;
                        return Err(e.into());
                    }
                }
            }
            invocations
        };

        let prompt_tokens: i64 = invocations.iter().map(|i| i.prompt_tokens).sum();
        let completion_tokens: i64 = invocations.iter().map(|i| i.completion_tokens).sum();

        let price = self.provider.unit_price().await;
        let prompt_cost = price.prompt * Decimal::from(prompt_tokens);
        let completion_cost = price.completion * Decimal::from(completion_tokens);

        // First invocation whose text yields a JSON object wins; otherwise
        // keep the last text so the caller sees what the model actually said
        let mut parsed: Option<(String, Value)> = None;
        for invocation in &invocations {
            if let Some(value) = parse::extract_json_object(&invocation.text) {
                parsed = Some((invocation.text.clone(), value));
                break;
            }
        }
        let raw_fallback = invocations.last().map(|i| i.text.clone());

        let result = match parsed {
            Some((raw, value)) => {
                let outcome = validate::validate_fields(value, &template.fields, buyer.as_deref());
                ExtractionResult {
                    success: true,
                    data: Some(outcome.data),
                    error: None,
                    raw_response: Some(raw),
                    validation_errors: outcome.errors,
                    validation_warnings: outcome.warnings,
                    usage: UsageSummary {
                        prompt_tokens,
                        completion_tokens,
                        total_tokens: prompt_tokens + completion_tokens,
                        total_cost: (prompt_cost + completion_cost).to_f64().unwrap_or(0.0),
                    },
                }
            }
            None => ExtractionResult {
                success: false,
                data: None,
                error: Some("no JSON object found in the model response".to_string()),
                raw_response: raw_fallback,
                validation_errors: Vec::new(),
                validation_warnings: Vec::new(),
                usage: UsageSummary {
                    prompt_tokens,
                    completion_tokens,
                    total_tokens: prompt_tokens + completion_tokens,
                    total_cost: (prompt_cost + completion_cost).to_f64().unwrap_or(0.0),
                },
            },
        };

        // The invocation completed and was billed, so the ledger row is a
        // success even when the model text was unusable
        let record = UsageRecordCreate {
            filename,
            buyer,
            template: template.name.clone(),
            provider: self.provider.name().to_string(),
            model: self.provider.model().to_string(),
            prompt_tokens,
            completion_tokens,
            prompt_cost,
            completion_cost,
            success: true,
            error_message: None,
            num_images,
        };
        let mut conn = self.db.acquire().await?;
        UsageLedger::new(&mut conn).append(&record).await?;

        Ok(result)
    }

    /// Record a failed invocation. The extraction error is what the caller
    /// cares about, so a ledger write failure here is logged, not returned.
    #[allow(clippy::too_many_arguments)]
    async fn record_failure(
        &self,
        template: &Template,
        filename: &Option<String>,
        buyer: &Option<String>,
        num_images: i64,
        prompt_tokens: i64,
        completion_tokens: i64,
        message: &str,
    ) {
        let price = self.provider.unit_price().await;
        let record = UsageRecordCreate {
            filename: filename.clone(),
            buyer: buyer.clone(),
            template: template.name.clone(),
            provider: self.provider.name().to_string(),
            model: self.provider.model().to_string(),
            prompt_tokens,
            completion_tokens,
            prompt_cost: price.prompt * Decimal::from(prompt_tokens),
            completion_cost: price.completion * Decimal::from(completion_tokens),
            success: false,
            error_message: Some(message.to_string()),
            num_images,
        };

        let append = async {
            let mut conn = self.db.acquire().await?;
            UsageLedger::new(&mut conn).append(&record).await
        };
        if let Err(e) = append.await {
            error!("Failed to record failed extraction in the usage ledger: {e}");
        }
    }

    /// Filtered, paginated read over the usage ledger.
    ///
    /// Out-of-range pagination is rejected, never clamped, so callers cannot
    /// silently miss rows.
    pub async fn query_usage(&self, filter: UsageFilter, limit: i64, offset: i64) -> Result<UsagePage> {
        if !(1..=1000).contains(&limit) {
            return Err(Error::InvalidQuery {
                message: format!("limit must be between 1 and 1000, got {limit}"),
            });
        }
        if offset < 0 {
            return Err(Error::InvalidQuery {
                message: format!("offset must not be negative, got {offset}"),
            });
        }

        let mut conn = self.db.acquire().await?;
        let mut ledger = UsageLedger::new(&mut conn);
        let records = ledger.list(&filter, limit, offset).await?;
        let total_records = ledger.count(&filter).await?;
        let stats = ledger.stats(&filter).await?;
        let provider_breakdown = ledger.stats_by_provider(&filter).await?;

        Ok(UsagePage {
            records,
            stats,
            provider_breakdown,
            total_records,
            limit,
            offset,
        })
    }
}
