//! OpenRouter cloud backend.
//!
//! Authenticates with a bearer key and prices invocations from the shared
//! [`PricingCache`], which mirrors OpenRouter's model catalog.

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{GenerationConfig, OpenRouterConfig};
use crate::preprocess::PageImage;
use crate::pricing::PricingCache;
use crate::templates::RenderedPrompt;

use super::{ModelInvocation, Result, TokenPrice, VisionProvider, chat_completion};

pub struct OpenRouterProvider {
    config: OpenRouterConfig,
    generation: GenerationConfig,
    http: reqwest::Client,
    pricing: Arc<PricingCache>,
}

impl OpenRouterProvider {
    pub fn new(
        config: OpenRouterConfig,
        generation: GenerationConfig,
        http: reqwest::Client,
        pricing: Arc<PricingCache>,
    ) -> Self {
        Self {
            config,
            generation,
            http,
            pricing,
        }
    }
}

#[async_trait]
impl VisionProvider for OpenRouterProvider {
    fn name(&self) -> &'static str {
        "openrouter"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    /// Hosted frontier models handle multi-image prompts well, so all pages
    /// of a document go out in a single request.
    fn batches_pages(&self) -> bool {
        true
    }

    async fn unit_price(&self) -> TokenPrice {
        self.pricing.price_for(&self.config.model).await
    }

    async fn invoke(&self, prompt: &RenderedPrompt, images: &[PageImage]) -> Result<ModelInvocation> {
        chat_completion(
            &self.http,
            &self.config.api_base,
            Some(&self.config.api_key),
            self.name(),
            &self.config.model,
            &self.generation,
            prompt,
            images,
        )
        .await
    }
}
