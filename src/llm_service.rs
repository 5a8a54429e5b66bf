use async_trait::async_trait;
use std::time::Duration;

use crate::llm_config::{LLMProviderConfig, Provider};
use crate::log_record::LabelTaxonomy;
use crate::traits::{InferenceBackend, InferenceError, ItemOutcome, LabelGuess};

/// LLM-backed implementation of the inference boundary
pub struct LLMServiceClient {
    config: LLMProviderConfig,
    taxonomy: LabelTaxonomy,
    http_client: reqwest::Client,
    name: String,
}

impl LLMServiceClient {
    pub fn new(config: LLMProviderConfig, taxonomy: LabelTaxonomy) -> anyhow::Result<Self> {
        config.validate()?;
        if taxonomy.is_empty() {
            anyhow::bail!("Label taxonomy must contain at least one label");
        }

        tracing::info!(
            "🤖 LLM fallback configured: {} ({}) at {}, {} labels",
            config.provider,
            config.model,
            config.endpoint(),
            taxonomy.len()
        );

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let name = format!("{}/{}", config.provider, config.model);

        Ok(Self {
            config,
            taxonomy,
            http_client,
            name,
        })
    }

    pub fn config(&self) -> &LLMProviderConfig {
        &self.config
    }

    async fn complete(&self, prompt: &str) -> Result<String, InferenceError> {
        match self.config.provider {
            Provider::OpenAI | Provider::Groq => self.call_chat_completions(prompt).await,
            Provider::Anthropic => self.call_anthropic(prompt).await,
            Provider::Ollama => self.call_ollama(prompt).await,
        }
    }

    async fn call_chat_completions(&self, prompt: &str) -> Result<String, InferenceError> {
        let api_key = self.api_key()?;

        let request_body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {
                    "role": "user",
                    "content": prompt
                }
            ],
            "temperature": 0.0,
            "max_tokens": 2000
        });

        let request = self
            .http_client
            .post(self.config.endpoint())
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&request_body);
        let response_json = self.send(request).await?;

        response_json
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                InferenceError::Malformed(format!("No content in {} response", self.config.provider))
            })
    }

    async fn call_anthropic(&self, prompt: &str) -> Result<String, InferenceError> {
        let api_key = self.api_key()?;

        let request_body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": 2000,
            "temperature": 0.0,
            "messages": [
                {
                    "role": "user",
                    "content": prompt
                }
            ]
        });

        let request = self
            .http_client
            .post(self.config.endpoint())
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request_body);
        let response_json = self.send(request).await?;

        response_json
            .get("content")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("text"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| InferenceError::Malformed("No content in Anthropic response".into()))
    }

    async fn call_ollama(&self, prompt: &str) -> Result<String, InferenceError> {
        let request_body = serde_json::json!({
            "model": self.config.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": 0.0,
            }
        });

        let request = self
            .http_client
            .post(format!("{}/api/generate", self.config.endpoint().trim_end_matches('/')))
            .json(&request_body);
        let response_json = self.send(request).await?;

        response_json
            .get("response")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| InferenceError::Malformed("No response from Ollama".into()))
    }

    fn api_key(&self) -> Result<&str, InferenceError> {
        self.config
            .api_key
            .as_deref()
            .ok_or_else(|| InferenceError::Rejected(format!("{} API key not configured", self.config.provider)))
    }

    /// Send a request and map transport/status failures onto the error taxonomy
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<serde_json::Value, InferenceError> {
        let response = request.send().await.map_err(|e| self.map_transport_error(e))?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(InferenceError::RateLimited { retry_after });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("{} API error {}: {}", self.config.provider, status, body);
            return if status.is_server_error() || status == reqwest::StatusCode::REQUEST_TIMEOUT {
                Err(InferenceError::Unavailable(message))
            } else {
                Err(InferenceError::Rejected(message))
            };
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| InferenceError::Malformed(format!("Invalid JSON body: {}", e)))
    }

    fn map_transport_error(&self, err: reqwest::Error) -> InferenceError {
        if err.is_timeout() {
            InferenceError::Timeout(Duration::from_secs(self.config.timeout_secs))
        } else {
            InferenceError::Unavailable(err.to_string())
        }
    }
}

#[async_trait]
impl InferenceBackend for LLMServiceClient {
    async fn classify_batch(
        &self,
        pairs: &[(String, String)],
    ) -> Result<Vec<ItemOutcome>, InferenceError> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }

        tracing::debug!("Requesting {} labels from {}", pairs.len(), self.name);
        let prompt = build_classification_prompt(&self.taxonomy, pairs);
        let output = self.complete(&prompt).await?;
        parse_classification_response(&output, pairs.len())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Prompt asking for one label per numbered log line, as a JSON array
pub fn build_classification_prompt(taxonomy: &LabelTaxonomy, pairs: &[(String, String)]) -> String {
    let labels = taxonomy
        .labels()
        .iter()
        .map(|l| format!("- {}", l))
        .collect::<Vec<_>>()
        .join("\n");

    let lines = pairs
        .iter()
        .enumerate()
        .map(|(i, (source, message))| {
            let message = message.replace('\n', " ");
            format!("{}. [{}] {}", i, source, message)
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Classify each log message into exactly one of these categories:
{labels}

If none of the categories fits, use "Unclassified".

LOG MESSAGES (index. [source] message):
{lines}

Respond with ONLY a JSON array containing exactly {count} objects, in the same order as the input, no explanation:
[{{"index": 0, "label": "<category>", "confidence": <0.0-1.0>}}, ...]
"#,
        labels = labels,
        lines = lines,
        count = pairs.len()
    )
}

/// Extract per-item outcomes from a model response.
///
/// The whole response is malformed when no JSON array can be found or the item
/// count differs from `expected`. Individual entries that are neither a string
/// nor an object with a string `label` become per-item errors.
///
/// Objects carrying an integer `index` are placed at that index; entries
/// without one fall back to their array position. An out-of-range index
/// leaves its slot unanswered, a repeated index poisons the slot, and every
/// unanswered slot is a per-item error.
pub fn parse_classification_response(
    response: &str,
    expected: usize,
) -> Result<Vec<ItemOutcome>, InferenceError> {
    let json_start = response
        .find('[')
        .ok_or_else(|| InferenceError::Malformed("No JSON array found".into()))?;
    let json_end = response
        .rfind(']')
        .ok_or_else(|| InferenceError::Malformed("No JSON array end found".into()))?;
    if json_end < json_start {
        return Err(InferenceError::Malformed("Unbalanced JSON array".into()));
    }
    let json_str = &response[json_start..=json_end];

    let items: Vec<serde_json::Value> = serde_json::from_str(json_str)
        .map_err(|e| InferenceError::Malformed(format!("Failed to parse JSON: {}", e)))?;

    if items.len() != expected {
        return Err(InferenceError::Malformed(format!(
            "Expected {} labels, got {}",
            expected,
            items.len()
        )));
    }

    let mut slots: Vec<Option<ItemOutcome>> = (0..expected).map(|_| None).collect();
    for (position, item) in items.iter().enumerate() {
        let slot = item_index(item).unwrap_or(position);
        match slots.get_mut(slot) {
            None => {
                tracing::warn!("Model answered out-of-range index {} (batch of {})", slot, expected);
            }
            Some(entry) if entry.is_none() => *entry = Some(parse_item(item)),
            Some(entry) => *entry = Some(Err(format!("Duplicate answers for index {}", slot))),
        }
    }

    Ok(slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| slot.unwrap_or_else(|| Err(format!("No answer for index {}", i))))
        .collect())
}

fn item_index(item: &serde_json::Value) -> Option<usize> {
    item.get("index")
        .and_then(|v| v.as_u64())
        .and_then(|i| usize::try_from(i).ok())
}

fn parse_item(item: &serde_json::Value) -> ItemOutcome {
    match item {
        serde_json::Value::String(label) => Ok(LabelGuess::new(label.clone())),
        serde_json::Value::Object(obj) => {
            let label = obj
                .get("label")
                .and_then(|v| v.as_str())
                .ok_or_else(|| format!("Item has no string label: {}", item))?;
            let guess = LabelGuess::new(label);
            Ok(match obj.get("confidence").and_then(|v| v.as_f64()) {
                Some(c) => guess.with_confidence((c as f32).clamp(0.0, 1.0)),
                None => guess,
            })
        }
        other => Err(format!("Unexpected item: {}", other)),
    }
}
