//! Vision-model provider abstraction layer.
//!
//! This module defines the [`VisionProvider`] trait which abstracts the
//! "send images + prompts, get text + token counts" operation across the two
//! interchangeable backends: a self-hosted vLLM server and the OpenRouter
//! cloud API. Both speak the OpenAI chat-completions wire format, so the
//! actual HTTP call is shared; the variants differ in credentials, pricing,
//! and page-batching behavior.
//!
//! Token counts are taken verbatim from the backend's `usage` object and are
//! never estimated locally. Each `invoke` makes exactly one network call and
//! never retries - retries are a caller-visible decision so that cost
//! accounting is never double-counted by a hidden retry.

use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use url::Url;

use crate::config::{GenerationConfig, ProviderConfig};
use crate::preprocess::PageImage;
use crate::pricing::PricingCache;
use crate::templates::RenderedPrompt;

pub mod openrouter;
pub mod vllm;

/// Create a provider from configuration.
///
/// This is the single point where config becomes a provider instance; nothing
/// downstream branches on the backend kind.
pub fn create_provider(
    config: &ProviderConfig,
    generation: &GenerationConfig,
    http: reqwest::Client,
    pricing: Arc<PricingCache>,
) -> Arc<dyn VisionProvider> {
    match config {
        ProviderConfig::Vllm(vllm) => Arc::new(vllm::VllmProvider::new(vllm.clone(), generation.clone(), http)),
        ProviderConfig::OpenRouter(openrouter) => Arc::new(openrouter::OpenRouterProvider::new(
            openrouter.clone(),
            generation.clone(),
            http,
            pricing,
        )),
    }
}

/// Result type for provider operations
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors that can occur when talking to a model backend
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Connection or timeout failure; the backend never saw the request
    /// complete (or we never saw the response)
    #[error("Model backend unreachable: {0}")]
    Unavailable(String),

    /// The backend rejected our credential
    #[error("Model backend rejected credentials: {0}")]
    Auth(String),

    /// The backend throttled the request; the caller may retry with backoff
    #[error("Model backend rate limited the request: {0}")]
    RateLimited(String),

    /// Any other backend API failure, including malformed responses
    #[error("Model backend API error: {0}")]
    Api(String),
}

/// Per-token price pair in USD
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenPrice {
    pub prompt: Decimal,
    pub completion: Decimal,
}

impl TokenPrice {
    pub const ZERO: TokenPrice = TokenPrice {
        prompt: Decimal::ZERO,
        completion: Decimal::ZERO,
    };
}

/// Outcome of one model invocation: the raw completion text plus the exact
/// token counts as reported by the backend
#[derive(Debug, Clone)]
pub struct ModelInvocation {
    pub text: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub provider: String,
    pub model: String,
}

/// Abstract vision-model backend interface
#[async_trait]
pub trait VisionProvider: Send + Sync {
    /// Stable provider identifier recorded in the usage ledger
    fn name(&self) -> &'static str;

    /// Model identifier sent to the backend and recorded in the ledger
    fn model(&self) -> &str;

    /// Whether all pages of a document can be sent in a single invocation.
    /// When false, the orchestrator invokes once per page and sums counts.
    fn batches_pages(&self) -> bool;

    /// Current per-token price for this provider's model. Self-hosted
    /// backends return zero; cloud backends consult the pricing cache.
    async fn unit_price(&self) -> TokenPrice;

    /// Send the prompts plus one-or-more page images to the backend and
    /// return the completion text with exact token counts. Exactly one
    /// network call; no retries; no caching of model output.
    async fn invoke(&self, prompt: &RenderedPrompt, images: &[PageImage]) -> Result<ModelInvocation>;
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: i64,
    #[serde(default)]
    completion_tokens: i64,
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() > 200 {
        let cut = trimmed
            .char_indices()
            .map(|(i, _)| i)
            .take_while(|&i| i <= 200)
            .last()
            .unwrap_or(0);
        format!("{}...", &trimmed[..cut])
    } else {
        trimmed.to_string()
    }
}

/// Shared OpenAI-compatible chat-completions call used by both variants.
///
/// Images travel as PNG data URLs in the user message content, followed by
/// the user prompt text. A JSON response format is requested best-effort;
/// backends that ignore it still work because parsing is defensive anyway.
pub(crate) async fn chat_completion(
    http: &reqwest::Client,
    api_base: &Url,
    api_key: Option<&str>,
    provider: &'static str,
    model: &str,
    generation: &GenerationConfig,
    prompt: &RenderedPrompt,
    images: &[PageImage],
) -> Result<ModelInvocation> {
    let mut content = Vec::with_capacity(images.len() + 1);
    for page in images {
        let data_url = page
            .to_png_data_url()
            .map_err(|e| ProviderError::Api(format!("failed to encode page {} for transport: {e}", page.number)))?;
        content.push(json!({"type": "image_url", "image_url": {"url": data_url}}));
    }
    content.push(json!({"type": "text", "text": prompt.user}));

    let body = json!({
        "model": model,
        "messages": [
            {"role": "system", "content": prompt.system},
            {"role": "user", "content": content}
        ],
        "temperature": generation.temperature,
        "max_tokens": generation.max_tokens,
        "response_format": {"type": "json_object"}
    });

    let url = format!("{}/chat/completions", api_base.as_str().trim_end_matches('/'));
    tracing::debug!(provider, model, images = images.len(), "Invoking vision backend");

    let mut request = http.post(&url).json(&body);
    if let Some(key) = api_key {
        request = request.bearer_auth(key);
    }

    let response = request.send().await.map_err(|e| {
        if e.is_timeout() || e.is_connect() {
            ProviderError::Unavailable(e.to_string())
        } else {
            ProviderError::Api(e.to_string())
        }
    })?;

    let status = response.status();
    let body_text = response
        .text()
        .await
        .map_err(|e| ProviderError::Unavailable(format!("failed to read response body: {e}")))?;

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            return Err(ProviderError::Auth(snippet(&body_text)));
        }
        StatusCode::TOO_MANY_REQUESTS => {
            return Err(ProviderError::RateLimited(snippet(&body_text)));
        }
        s if s.is_server_error() => {
            return Err(ProviderError::Unavailable(format!("{status}: {}", snippet(&body_text))));
        }
        s if !s.is_success() => {
            return Err(ProviderError::Api(format!("{status}: {}", snippet(&body_text))));
        }
        _ => {}
    }

    let parsed: ChatResponse = serde_json::from_str(&body_text)
        .map_err(|e| ProviderError::Api(format!("malformed completion response: {e}")))?;

    let text = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .unwrap_or_default();
    let usage = parsed.usage.unwrap_or_default();

    tracing::debug!(
        provider,
        model,
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        "Backend invocation complete"
    );

    Ok(ModelInvocation {
        text,
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        provider: provider.to_string(),
        model: model.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LimitsConfig, VllmConfig};
    use crate::preprocess::{DocumentKind, preprocess};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_pages() -> Vec<PageImage> {
        let image = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(8, 8, image::Rgb([255, 255, 255])));
        let mut buffer = std::io::Cursor::new(Vec::new());
        image.write_to(&mut buffer, image::ImageFormat::Png).unwrap();
        preprocess(&buffer.into_inner(), DocumentKind::Png, &LimitsConfig::default()).unwrap()
    }

    fn test_prompt() -> RenderedPrompt {
        RenderedPrompt {
            system: "You extract invoice data.".to_string(),
            user: "Extract the fields.".to_string(),
        }
    }

    async fn provider_for(server: &MockServer) -> vllm::VllmProvider {
        let config = VllmConfig {
            api_base: Url::parse(&format!("{}/v1", server.uri())).unwrap(),
            model: "test-vl".to_string(),
        };
        vllm::VllmProvider::new(config, GenerationConfig::default(), reqwest::Client::new())
    }

    #[tokio::test]
    async fn invoke_returns_text_and_backend_token_counts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(serde_json::json!({"model": "test-vl"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "{\"amount\": 12.5}"}}],
                "usage": {"prompt_tokens": 321, "completion_tokens": 17, "total_tokens": 338}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider_for(&server).await;
        let result = provider.invoke(&test_prompt(), &test_pages()).await.unwrap();

        assert_eq!(result.text, "{\"amount\": 12.5}");
        assert_eq!(result.prompt_tokens, 321);
        assert_eq!(result.completion_tokens, 17);
        assert_eq!(result.provider, "vllm");
        assert_eq!(result.model, "test-vl");
    }

    #[tokio::test]
    async fn credential_rejection_maps_to_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let provider = provider_for(&server).await;
        match provider.invoke(&test_prompt(), &test_pages()).await {
            Err(ProviderError::Auth(detail)) => assert!(detail.contains("invalid api key")),
            other => panic!("expected Auth error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn throttling_maps_to_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let provider = provider_for(&server).await;
        assert!(matches!(
            provider.invoke(&test_prompt(), &test_pages()).await,
            Err(ProviderError::RateLimited(_))
        ));
    }

    #[tokio::test]
    async fn server_errors_map_to_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let provider = provider_for(&server).await;
        assert!(matches!(
            provider.invoke(&test_prompt(), &test_pages()).await,
            Err(ProviderError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn connection_refused_maps_to_unavailable() {
        let config = VllmConfig {
            // Reserved port with nothing listening
            api_base: Url::parse("http://127.0.0.1:1/v1").unwrap(),
            model: "test-vl".to_string(),
        };
        let provider = vllm::VllmProvider::new(config, GenerationConfig::default(), reqwest::Client::new());
        assert!(matches!(
            provider.invoke(&test_prompt(), &test_pages()).await,
            Err(ProviderError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn openrouter_sends_bearer_credential() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "{}"}}],
                "usage": {"prompt_tokens": 1, "completion_tokens": 1}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = crate::config::OpenRouterConfig {
            api_base: Url::parse(&format!("{}/api/v1", server.uri())).unwrap(),
            model: "some/vision-model".to_string(),
            api_key: "sk-test".to_string(),
        };
        let pricing = Arc::new(PricingCache::new(
            reqwest::Client::new(),
            Url::parse("http://127.0.0.1:1/models").unwrap(),
            std::time::Duration::from_secs(60),
        ));
        let provider =
            openrouter::OpenRouterProvider::new(config, GenerationConfig::default(), reqwest::Client::new(), pricing);
        let result = provider.invoke(&test_prompt(), &test_pages()).await.unwrap();
        assert_eq!(result.provider, "openrouter");
    }
}
