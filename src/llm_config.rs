use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAI,
    Groq,
    Anthropic,
    Ollama,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Groq => "groq",
            Provider::Anthropic => "anthropic",
            Provider::Ollama => "ollama",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::OpenAI => "gpt-4o-mini",
            Provider::Groq => "llama-3.3-70b-versatile",
            Provider::Anthropic => "claude-3-5-haiku-latest",
            Provider::Ollama => "llama3",
        }
    }

    pub fn default_endpoint(&self) -> &'static str {
        match self {
            Provider::OpenAI => "https://api.openai.com/v1/chat/completions",
            Provider::Groq => "https://api.groq.com/openai/v1/chat/completions",
            Provider::Anthropic => "https://api.anthropic.com/v1/messages",
            Provider::Ollama => "http://localhost:11434",
        }
    }

    /// Hosted providers need a credential; a local Ollama does not
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, Provider::Ollama)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAI),
            "groq" => Ok(Provider::Groq),
            "anthropic" => Ok(Provider::Anthropic),
            "ollama" => Ok(Provider::Ollama),
            other => anyhow::bail!(
                "Unsupported LLM provider '{}' (expected openai, groq, anthropic or ollama)",
                other
            ),
        }
    }
}

/// Configuration for the LLM provider behind the fallback classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMProviderConfig {
    pub provider: Provider,
    pub model: String,
    /// Credential for the external boundary
    pub api_key: Option<String>,
    /// Overrides the provider's default URL
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
}

impl Default for LLMProviderConfig {
    fn default() -> Self {
        Self::for_provider(Provider::Groq)
    }
}

impl LLMProviderConfig {
    pub fn for_provider(provider: Provider) -> Self {
        Self {
            provider,
            model: provider.default_model().to_string(),
            api_key: None,
            endpoint: None,
            timeout_secs: 60,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint
            .as_deref()
            .unwrap_or_else(|| self.provider.default_endpoint())
    }

    /// First few characters of the key, for startup logging
    pub fn masked_api_key(&self) -> String {
        match &self.api_key {
            Some(key) => format!("{}***", key.chars().take(4).collect::<String>()),
            None => "<none>".to_string(),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.model.trim().is_empty() {
            anyhow::bail!("LLM model must not be empty");
        }
        if self.timeout_secs == 0 {
            anyhow::bail!("LLM timeout must be at least 1 second");
        }
        if self.provider.requires_api_key()
            && self.api_key.as_deref().map_or(true, |k| k.trim().is_empty())
        {
            anyhow::bail!("Provider {} requires an API key (LLM_API_KEY)", self.provider);
        }
        Ok(())
    }
}
