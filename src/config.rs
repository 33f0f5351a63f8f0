//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The
//! configuration file path defaults to `config.yaml` but can be specified via the `-f` flag or
//! the `PAPERTRAIL_CONFIG` environment variable.
//!
//! Sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `PAPERTRAIL_` override YAML values
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `PAPERTRAIL_PROVIDER__MODEL=...` sets the `provider.model` field.

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use url::Url;

/// Simple CLI args - just for specifying the config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "PAPERTRAIL_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    /// Useful for CI/CD pipelines to catch config errors before deployment.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// All fields have sensible defaults defined in the `Default` implementation; a missing
/// config file yields a working self-hosted setup pointing at a local vLLM server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Usage ledger database configuration
    pub database: DatabaseConfig,
    /// Path to the prompt templates YAML file
    pub templates_file: PathBuf,
    /// Which vision-model backend to talk to
    pub provider: ProviderConfig,
    /// Completion request parameters shared by both backends
    pub generation: GenerationConfig,
    /// Upload and image size bounds
    pub limits: LimitsConfig,
    /// Token pricing cache configuration
    pub pricing: PricingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            database: DatabaseConfig::default(),
            templates_file: PathBuf::from("templates.yaml"),
            provider: ProviderConfig::default(),
            generation: GenerationConfig::default(),
            limits: LimitsConfig::default(),
            pricing: PricingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// SQLite connection URL, e.g. "sqlite://papertrail.db". The database file is
    /// created on first start if missing.
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://papertrail.db".to_string(),
            max_connections: 5,
        }
    }
}

/// Backend selection. Switching backends is a pure strategy choice; nothing
/// downstream of the provider gateway branches on it.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    /// Self-hosted OpenAI-compatible inference server. Assumed free of
    /// per-token monetary cost.
    Vllm(VllmConfig),
    /// OpenRouter cloud API. Requires a credential; costs are computed from
    /// the pricing catalog.
    OpenRouter(OpenRouterConfig),
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig::Vllm(VllmConfig::default())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct VllmConfig {
    pub api_base: Url,
    pub model: String,
}

impl Default for VllmConfig {
    fn default() -> Self {
        Self {
            api_base: Url::parse("http://localhost:8000/v1").expect("static URL"),
            model: "Qwen/Qwen2-VL-7B-Instruct".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct OpenRouterConfig {
    pub api_base: Url,
    pub model: String,
    pub api_key: String,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_base: Url::parse("https://openrouter.ai/api/v1").expect("static URL"),
            model: "qwen/qwen3-vl-8b-instruct".to_string(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerationConfig {
    pub max_tokens: u32,
    pub temperature: f32,
    /// Timeout applied to every backend HTTP request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: 2000,
            temperature: 0.1,
            request_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Upload ceiling in mebibytes, enforced before any decoding work
    pub max_file_size_mb: usize,
    /// Pages are downscaled (never upscaled) to fit this bound per side
    pub max_image_dimension: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: 10,
            max_image_dimension: 1024,
        }
    }
}

impl LimitsConfig {
    pub fn max_file_size(&self) -> usize {
        self.max_file_size_mb * 1024 * 1024
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PricingConfig {
    /// How long a fetched price table stays fresh before a refresh is attempted
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl Config {
    /// Load configuration from the YAML file named in `args`, with
    /// `PAPERTRAIL_`-prefixed environment variables taking precedence.
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            .merge(Env::prefixed("PAPERTRAIL_").split("__"))
    }

    fn validate(&self) -> anyhow::Result<()> {
        if let ProviderConfig::OpenRouter(openrouter) = &self.provider
            && openrouter.api_key.trim().is_empty()
        {
            anyhow::bail!("provider.api_key is required when provider.type is 'openrouter'");
        }
        if self.limits.max_file_size_mb == 0 {
            anyhow::bail!("limits.max_file_size_mb must be greater than zero");
        }
        if self.limits.max_image_dimension == 0 {
            anyhow::bail!("limits.max_image_dimension must be greater than zero");
        }
        if self.generation.max_tokens == 0 {
            anyhow::bail!("generation.max_tokens must be greater than zero");
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
