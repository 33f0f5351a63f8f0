//! Usage ledger repository.
//!
//! Append-only writes plus filtered reads and aggregations. Every operation
//! takes `&mut SqliteConnection` so callers decide transaction boundaries.

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use tracing::instrument;

use crate::db::models::usage::{ProviderUsage, UsageFilter, UsageRecord, UsageRecordCreate, UsageStats};

pub struct UsageLedger<'c> {
    db: &'c mut SqliteConnection,
}

fn apply_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &UsageFilter) {
    if let Some(provider) = &filter.provider {
        builder.push(" AND provider = ").push_bind(provider.clone());
    }
    if let Some(buyer) = &filter.buyer {
        builder.push(" AND buyer = ").push_bind(buyer.clone());
    }
    if let Some(start) = filter.start_date {
        builder.push(" AND created_at >= ").push_bind(start);
    }
    if let Some(end) = filter.end_date {
        builder.push(" AND created_at <= ").push_bind(end);
    }
}

impl<'c> UsageLedger<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    /// Append one row to the ledger. Derived columns (`total_tokens`,
    /// `total_cost`) are computed here so the row is internally consistent.
    #[instrument(skip(self, record), fields(provider = %record.provider, success = record.success))]
    pub async fn append(&mut self, record: &UsageRecordCreate) -> Result<UsageRecord, sqlx::Error> {
        let created = sqlx::query_as::<_, UsageRecord>(
            r#"
            INSERT INTO usage_records (
                created_at, filename, buyer, template, provider, model,
                prompt_tokens, completion_tokens, total_tokens,
                prompt_cost, completion_cost, total_cost,
                success, error_message, num_images
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Utc::now())
        .bind(&record.filename)
        .bind(&record.buyer)
        .bind(&record.template)
        .bind(&record.provider)
        .bind(&record.model)
        .bind(record.prompt_tokens)
        .bind(record.completion_tokens)
        .bind(record.total_tokens())
        .bind(record.prompt_cost.to_f64().unwrap_or(0.0))
        .bind(record.completion_cost.to_f64().unwrap_or(0.0))
        .bind(record.total_cost().to_f64().unwrap_or(0.0))
        .bind(record.success)
        .bind(&record.error_message)
        .bind(record.num_images)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(created)
    }

    /// Filtered page of ledger rows, newest first (ties broken by id)
    #[instrument(skip(self, filter))]
    pub async fn list(
        &mut self,
        filter: &UsageFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<UsageRecord>, sqlx::Error> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM usage_records WHERE 1=1");
        apply_filter(&mut builder, filter);
        builder
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        builder.build_query_as::<UsageRecord>().fetch_all(&mut *self.db).await
    }

    /// Total number of rows matching the filter (for pagination)
    #[instrument(skip(self, filter))]
    pub async fn count(&mut self, filter: &UsageFilter) -> Result<i64, sqlx::Error> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM usage_records WHERE 1=1");
        apply_filter(&mut builder, filter);
        builder.build_query_scalar::<i64>().fetch_one(&mut *self.db).await
    }

    /// Aggregate totals over the filtered rows. An empty match yields zeros.
    #[instrument(skip(self, filter))]
    pub async fn stats(&mut self, filter: &UsageFilter) -> Result<UsageStats, sqlx::Error> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            r#"
            SELECT
                COUNT(*) AS total_requests,
                COALESCE(SUM(CASE WHEN success THEN 1 ELSE 0 END), 0) AS successful_requests,
                COALESCE(SUM(CASE WHEN success THEN 0 ELSE 1 END), 0) AS failed_requests,
                COALESCE(SUM(prompt_tokens), 0) AS total_prompt_tokens,
                COALESCE(SUM(completion_tokens), 0) AS total_completion_tokens,
                COALESCE(SUM(total_tokens), 0) AS total_tokens,
                COALESCE(SUM(total_cost), 0.0) AS total_cost,
                COALESCE(SUM(num_images), 0) AS total_images
            FROM usage_records WHERE 1=1
            "#,
        );
        apply_filter(&mut builder, filter);
        builder.build_query_as::<UsageStats>().fetch_one(&mut *self.db).await
    }

    /// Aggregate totals grouped by provider, largest spender first
    #[instrument(skip(self, filter))]
    pub async fn stats_by_provider(&mut self, filter: &UsageFilter) -> Result<Vec<ProviderUsage>, sqlx::Error> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            r#"
            SELECT
                provider,
                COUNT(*) AS total_requests,
                COALESCE(SUM(total_tokens), 0) AS total_tokens,
                COALESCE(SUM(total_cost), 0.0) AS total_cost
            FROM usage_records WHERE 1=1
            "#,
        );
        apply_filter(&mut builder, filter);
        builder.push(" GROUP BY provider ORDER BY total_cost DESC, provider ASC");
        builder.build_query_as::<ProviderUsage>().fetch_all(&mut *self.db).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrator;
    use rust_decimal::Decimal;
    use sqlx::SqlitePool;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::str::FromStr;

    async fn test_pool() -> SqlitePool {
        // A single connection keeps the in-memory database alive for the test
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrator().run(&pool).await.unwrap();
        pool
    }

    fn record(provider: &str, buyer: Option<&str>, success: bool, tokens: (i64, i64)) -> UsageRecordCreate {
        UsageRecordCreate {
            filename: Some("invoice.pdf".to_string()),
            buyer: buyer.map(str::to_string),
            template: "default_invoice".to_string(),
            provider: provider.to_string(),
            model: "some/vision-model".to_string(),
            prompt_tokens: tokens.0,
            completion_tokens: tokens.1,
            prompt_cost: Decimal::from_str("0.0001").unwrap(),
            completion_cost: Decimal::from_str("0.00002").unwrap(),
            success,
            error_message: if success { None } else { Some("backend exploded".to_string()) },
            num_images: 1,
        }
    }

    #[tokio::test]
    async fn append_computes_derived_columns() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let mut ledger = UsageLedger::new(&mut conn);

        let created = ledger.append(&record("vllm", Some("Acme"), true, (500, 50))).await.unwrap();
        assert_eq!(created.total_tokens, 550);
        assert!((created.total_cost - 0.00012).abs() < 1e-12);
        assert!((created.prompt_cost - 0.0001).abs() < 1e-12);
        assert!(created.success);
        assert_eq!(created.buyer.as_deref(), Some("Acme"));
    }

    #[tokio::test]
    async fn list_is_newest_first_and_paginates() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let mut ledger = UsageLedger::new(&mut conn);

        for i in 0..5 {
            ledger.append(&record("vllm", None, true, (i, i))).await.unwrap();
        }

        let page = ledger.list(&UsageFilter::default(), 2, 0).await.unwrap();
        assert_eq!(page.len(), 2);
        // Rows share a timestamp resolution, so id breaks the tie
        assert!(page[0].id > page[1].id);

        let rest = ledger.list(&UsageFilter::default(), 10, 2).await.unwrap();
        assert_eq!(rest.len(), 3);
        assert_eq!(ledger.count(&UsageFilter::default()).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn filters_are_conjunctive() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let mut ledger = UsageLedger::new(&mut conn);

        ledger.append(&record("vllm", Some("Acme"), true, (10, 1))).await.unwrap();
        ledger.append(&record("openrouter", Some("Acme"), true, (10, 1))).await.unwrap();
        ledger.append(&record("openrouter", Some("Globex"), false, (10, 1))).await.unwrap();

        let filter = UsageFilter {
            provider: Some("openrouter".to_string()),
            buyer: Some("Acme".to_string()),
            ..Default::default()
        };
        let rows = ledger.list(&filter, 100, 0).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].provider, "openrouter");
        assert_eq!(rows[0].buyer.as_deref(), Some("Acme"));
    }

    #[tokio::test]
    async fn stats_aggregate_success_and_failure() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let mut ledger = UsageLedger::new(&mut conn);

        ledger.append(&record("vllm", None, true, (100, 10))).await.unwrap();
        ledger.append(&record("vllm", None, true, (200, 20))).await.unwrap();
        ledger.append(&record("openrouter", None, false, (0, 0))).await.unwrap();

        let stats = ledger.stats(&UsageFilter::default()).await.unwrap();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.successful_requests, 2);
        assert_eq!(stats.failed_requests, 1);
        assert_eq!(stats.total_prompt_tokens, 300);
        assert_eq!(stats.total_completion_tokens, 30);
        assert_eq!(stats.total_tokens, 330);
        assert_eq!(stats.total_images, 3);

        let by_provider = ledger.stats_by_provider(&UsageFilter::default()).await.unwrap();
        assert_eq!(by_provider.len(), 2);
        let vllm = by_provider.iter().find(|p| p.provider == "vllm").unwrap();
        assert_eq!(vllm.total_requests, 2);
        assert_eq!(vllm.total_tokens, 330);
    }

    #[tokio::test]
    async fn stats_on_empty_ledger_are_zero() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let mut ledger = UsageLedger::new(&mut conn);

        let stats = ledger.stats(&UsageFilter::default()).await.unwrap();
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.total_tokens, 0);
        assert_eq!(stats.total_cost, 0.0);
        assert!(ledger.stats_by_provider(&UsageFilter::default()).await.unwrap().is_empty());
    }
}
