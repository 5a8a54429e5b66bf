use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::fallback::{FallbackConfig, RetryPolicy};
use crate::llm_config::{LLMProviderConfig, Provider};
use crate::log_record::LabelTaxonomy;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: String,
    /// Single labeled artifact, overwritten per request
    pub output_path: PathBuf,
    /// JSON rule file; built-in rules when unset
    pub rules_file: Option<PathBuf>,
    pub max_upload_bytes: usize,

    pub llm: LLMProviderConfig,
    pub fallback: FallbackConfig,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value source; `from_env` passes the process environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let provider = match get("LLM_PROVIDER") {
            Some(p) => Provider::from_str(&p)?,
            None => Provider::Groq,
        };

        let mut llm = LLMProviderConfig::for_provider(provider);
        if let Some(model) = get("LLM_MODEL") {
            llm.model = model;
        }
        llm.api_key = get("LLM_API_KEY").or_else(|| get("GROQ_API_KEY"));
        llm.endpoint = get("LLM_ENDPOINT");
        llm.timeout_secs = parse_or(&get, "LLM_TIMEOUT_SECS", 60)?;

        let defaults = FallbackConfig::default();
        let fallback = FallbackConfig {
            chunk_size: parse_or(&get, "FALLBACK_CHUNK_SIZE", defaults.chunk_size)?,
            max_concurrency: parse_or(&get, "FALLBACK_MAX_CONCURRENCY", defaults.max_concurrency)?,
            retry: RetryPolicy {
                max_attempts: parse_or(&get, "FALLBACK_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
                initial_backoff: Duration::from_millis(parse_or(
                    &get,
                    "FALLBACK_INITIAL_BACKOFF_MS",
                    defaults.retry.initial_backoff.as_millis() as u64,
                )?),
                ..defaults.retry
            },
            call_timeout: Duration::from_secs(llm.timeout_secs),
            min_confidence: parse_or(&get, "FALLBACK_MIN_CONFIDENCE", defaults.min_confidence)?,
            taxonomy: get("LABEL_TAXONOMY")
                .map(|list| LabelTaxonomy::parse(&list))
                .unwrap_or(defaults.taxonomy),
        };

        Ok(ServiceConfig {
            bind_addr: get("CLASSIFY_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8000".to_string()),
            output_path: get("OUTPUT_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("resources/output.csv")),
            rules_file: get("RULES_FILE").map(PathBuf::from),
            max_upload_bytes: parse_or(&get, "MAX_UPLOAD_BYTES", 50 * 1024 * 1024)?,
            llm,
            fallback,
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.llm.validate()?;
        self.fallback.validate()?;
        if self.fallback.taxonomy.is_empty() {
            anyhow::bail!("LABEL_TAXONOMY must contain at least one label");
        }
        if self.max_upload_bytes == 0 {
            anyhow::bail!("MAX_UPLOAD_BYTES must be positive");
        }
        Ok(())
    }

    pub fn log_config(&self) {
        tracing::info!("📋 Configuration:");
        tracing::info!("   Bind address: {}", self.bind_addr);
        tracing::info!("   Output file: {}", self.output_path.display());
        match &self.rules_file {
            Some(path) => tracing::info!("   Rules file: {}", path.display()),
            None => tracing::info!("   Rules file: <built-in rules>"),
        }
        tracing::info!("   Max upload: {} bytes", self.max_upload_bytes);
        tracing::info!("   LLM Provider: {}", self.llm.provider);
        tracing::info!("   LLM Model: {}", self.llm.model);
        tracing::info!("   LLM Endpoint: {}", self.llm.endpoint());
        tracing::info!("   LLM API Key: {}", self.llm.masked_api_key());
        tracing::info!(
            "   Fallback: chunk {}, concurrency {}, attempts {}, min confidence {}",
            self.fallback.chunk_size,
            self.fallback.max_concurrency,
            self.fallback.retry.max_attempts,
            self.fallback.min_confidence
        );
        tracing::info!("   Labels: {}", self.fallback.taxonomy.labels().join(", "));
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{} has an invalid value: '{}'", key, raw)),
        None => Ok(default),
    }
}
