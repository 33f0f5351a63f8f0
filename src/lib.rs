//! papertrail: invoice and receipt extraction service.
//!
//! Uploads (single images or multi-page PDFs) are normalized into page
//! images, sent to a configured vision-language model backend, and the
//! model's answer is parsed and validated into structured invoice fields.
//! Every billable invocation is recorded in a durable usage ledger.
//!
//! The crate is organized as:
//!
//! - **[`api`]**: HTTP surface (axum) with OpenAPI docs
//! - **[`extraction`]**: orchestration, response parsing, field validation
//! - **[`preprocess`]**: upload decoding, PDF rasterization, downscaling
//! - **[`providers`]**: vision-model backends (vLLM, OpenRouter)
//! - **[`pricing`]**: cached per-token prices for cost accounting
//! - **[`templates`]**: reloadable prompt template registry
//! - **[`db`]**: SQLite usage ledger

use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

pub mod api;
pub mod config;
pub mod db;
pub mod errors;
pub mod extraction;
pub mod preprocess;
pub mod pricing;
pub mod providers;
pub mod telemetry;
pub mod templates;

pub use config::Config;

use extraction::Extractor;
use pricing::PricingCache;
use templates::TemplateRegistry;

/// Shared state available to all request handlers
#[derive(Clone)]
pub struct AppState {
    pub extractor: Extractor,
}

/// The assembled service: configuration resolved, database migrated,
/// provider and templates ready, router built.
pub struct Application {
    router: axum::Router,
    pool: sqlx::SqlitePool,
    bind_address: String,
}

impl Application {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let pool = db::connect(&config.database).await?;

        let http = reqwest::Client::builder()
            .timeout(config.generation.request_timeout)
            .build()?;

        // The pricing catalog lives next to the OpenRouter completions API;
        // for vLLM the cache exists but is never consulted
        let catalog_url = match &config.provider {
            config::ProviderConfig::Vllm(vllm) => pricing::catalog_url(&vllm.api_base)?,
            config::ProviderConfig::OpenRouter(openrouter) => pricing::catalog_url(&openrouter.api_base)?,
        };
        let pricing = Arc::new(PricingCache::new(http.clone(), catalog_url, config.pricing.ttl));

        let provider = providers::create_provider(&config.provider, &config.generation, http, pricing);
        let templates = Arc::new(TemplateRegistry::load(&config.templates_file)?);

        let extractor = Extractor::new(templates, provider, pool.clone(), config.limits.clone());
        info!(
            provider = extractor.provider_name(),
            model = %extractor.provider_model(),
            "Extraction service configured"
        );

        // Headroom for multipart framing; the exact file ceiling is enforced
        // by preprocessing
        let max_body_size = config.limits.max_file_size() + 64 * 1024;
        let router = api::router(AppState { extractor }, max_body_size);

        Ok(Self {
            router,
            pool,
            bind_address: config.bind_address(),
        })
    }

    /// Router handle for in-process tests
    pub fn router(&self) -> axum::Router {
        self.router.clone()
    }

    /// Serve until the shutdown future resolves, then drain connections and
    /// close the database pool.
    pub async fn serve(self, shutdown: impl Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.bind_address).await?;
        info!(address = %self.bind_address, "Listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        self.pool.close().await;
        info!("Shutdown complete");
        Ok(())
    }
}
