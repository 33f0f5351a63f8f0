//! Self-hosted vLLM backend.
//!
//! Speaks the OpenAI-compatible chat-completions API without credentials and
//! reports a zero unit price: self-hosted inference has no per-token monetary
//! cost, so the ledger records token counts with zero-cost rows.

use async_trait::async_trait;

use crate::config::{GenerationConfig, VllmConfig};
use crate::preprocess::PageImage;
use crate::templates::RenderedPrompt;

use super::{ModelInvocation, Result, TokenPrice, VisionProvider, chat_completion};

pub struct VllmProvider {
    config: VllmConfig,
    generation: GenerationConfig,
    http: reqwest::Client,
}

impl VllmProvider {
    pub fn new(config: VllmConfig, generation: GenerationConfig, http: reqwest::Client) -> Self {
        Self {
            config,
            generation,
            http,
        }
    }
}

#[async_trait]
impl VisionProvider for VllmProvider {
    fn name(&self) -> &'static str {
        "vllm"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    /// Open-weight vision models served by vLLM degrade noticeably on
    /// multi-image prompts, so each page is sent as its own request.
    fn batches_pages(&self) -> bool {
        false
    }

    async fn unit_price(&self) -> TokenPrice {
        TokenPrice::ZERO
    }

    async fn invoke(&self, prompt: &RenderedPrompt, images: &[PageImage]) -> Result<ModelInvocation> {
        chat_completion(
            &self.http,
            &self.config.api_base,
            None,
            self.name(),
            &self.config.model,
            &self.generation,
            prompt,
            images,
        )
        .await
    }
}
