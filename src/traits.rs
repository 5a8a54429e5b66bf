/// Dependency injection seam for the external inference boundary
///
/// The fallback classifier only ever talks to an `InferenceBackend`, so it can
/// be driven by a real LLM provider in production and by a deterministic stub
/// in tests.
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// A label proposed by a backend for one input pair
#[derive(Debug, Clone, PartialEq)]
pub struct LabelGuess {
    pub label: String,
    pub confidence: Option<f32>,
}

impl LabelGuess {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// Per-item outcome. `Err` carries a description of the malformed item and
/// never affects its siblings.
pub type ItemOutcome = Result<LabelGuess, String>;

/// Whole-call failure of the inference boundary
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference call timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited by inference provider{}", .retry_after.map(|d| format!(" (retry after {:?})", d)).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },

    #[error("inference provider unavailable: {0}")]
    Unavailable(String),

    #[error("inference request rejected: {0}")]
    Rejected(String),

    #[error("malformed inference response: {0}")]
    Malformed(String),
}

impl InferenceError {
    /// Transient errors are worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            InferenceError::Timeout(_)
                | InferenceError::RateLimited { .. }
                | InferenceError::Unavailable(_)
        )
    }

    /// Provider-requested minimum wait before the next attempt
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            InferenceError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// External inference boundary
///
/// Given `(source, message)` pairs, returns exactly one outcome per input in
/// the same order, or fails the whole call.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn classify_batch(
        &self,
        pairs: &[(String, String)],
    ) -> Result<Vec<ItemOutcome>, InferenceError>;

    /// Get the name/identifier of this backend (for reporting)
    fn name(&self) -> &str;
}
