// Deterministic inference backends shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use log_classifier::fallback::{FallbackClassifier, FallbackConfig, RetryPolicy};
use log_classifier::log_record::LabelTaxonomy;
use log_classifier::orchestrator::Orchestrator;
use log_classifier::rule_matcher::RuleMatcher;
use log_classifier::traits::{InferenceBackend, InferenceError, ItemOutcome, LabelGuess};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Labels by keyword; optionally stalls so chunks finish out of order
#[derive(Default)]
pub struct KeywordBackend {
    pub calls: AtomicUsize,
    pub items: AtomicUsize,
    /// Later chunks (by first message) finish first when set
    pub scramble: bool,
}

impl KeywordBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scrambled() -> Arc<Self> {
        Arc::new(Self {
            scramble: true,
            ..Default::default()
        })
    }

    pub fn label_for(message: &str) -> &'static str {
        let message = message.to_lowercase();
        if message.contains("refused") {
            "Critical Error"
        } else if message.contains("deprecated") {
            "Deprecation Warning"
        } else if message.contains("escalation") {
            "Workflow Error"
        } else {
            "Error"
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceBackend for KeywordBackend {
    async fn classify_batch(
        &self,
        pairs: &[(String, String)],
    ) -> Result<Vec<ItemOutcome>, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.items.fetch_add(pairs.len(), Ordering::SeqCst);

        if self.scramble {
            let digits: u64 = pairs[0]
                .1
                .chars()
                .filter(|c| c.is_ascii_digit())
                .collect::<String>()
                .parse()
                .unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(50u64.saturating_sub(digits % 50))).await;
        }

        Ok(pairs
            .iter()
            .map(|(_, message)| Ok(LabelGuess::new(Self::label_for(message)).with_confidence(0.9)))
            .collect())
    }

    fn name(&self) -> &str {
        "keyword-stub"
    }
}

/// Fails the first `failures` calls with a rate limit, then delegates
pub struct FlakyBackend {
    pub failures: usize,
    pub calls: AtomicUsize,
    pub permanent: bool,
}

impl FlakyBackend {
    pub fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicUsize::new(0),
            permanent: false,
        })
    }

    pub fn rejecting() -> Arc<Self> {
        Arc::new(Self {
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
            permanent: true,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceBackend for FlakyBackend {
    async fn classify_batch(
        &self,
        pairs: &[(String, String)],
    ) -> Result<Vec<ItemOutcome>, InferenceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(if self.permanent {
                InferenceError::Rejected("401 invalid api key".into())
            } else {
                InferenceError::RateLimited { retry_after: None }
            });
        }
        Ok(pairs
            .iter()
            .map(|(_, m)| Ok(LabelGuess::new(KeywordBackend::label_for(m))))
            .collect())
    }

    fn name(&self) -> &str {
        "flaky-stub"
    }
}

/// Always fails (transiently) any chunk containing `poison`; per-item errors
/// for messages equal to "garbage"; labels outside the taxonomy for "weird"
pub struct SelectiveBackend {
    pub poison: String,
    pub calls: AtomicUsize,
}

impl SelectiveBackend {
    pub fn new(poison: &str) -> Arc<Self> {
        Arc::new(Self {
            poison: poison.to_string(),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl InferenceBackend for SelectiveBackend {
    async fn classify_batch(
        &self,
        pairs: &[(String, String)],
    ) -> Result<Vec<ItemOutcome>, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if pairs.iter().any(|(_, m)| *m == self.poison) {
            return Err(InferenceError::Unavailable("503 upstream overloaded".into()));
        }
        Ok(pairs
            .iter()
            .map(|(_, m)| match m.as_str() {
                "garbage" => Err("item was not valid JSON".to_string()),
                "weird" => Ok(LabelGuess::new("Totally New Category")),
                "unsure" => Ok(LabelGuess::new("Security Alert").with_confidence(0.2)),
                other => Ok(LabelGuess::new(KeywordBackend::label_for(other)).with_confidence(0.95)),
            })
            .collect())
    }

    fn name(&self) -> &str {
        "selective-stub"
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        jitter: 0.0,
    }
}

pub fn test_config(chunk_size: usize, max_concurrency: usize) -> FallbackConfig {
    FallbackConfig {
        chunk_size,
        max_concurrency,
        retry: fast_retry(),
        call_timeout: Duration::from_secs(5),
        min_confidence: 0.0,
        taxonomy: LabelTaxonomy::default(),
    }
}

pub fn auth_rules() -> RuleMatcher {
    let mut rules = RuleMatcher::new();
    rules
        .add_rule("auth", "login failed", "AUTH_FAIL")
        .expect("valid rule");
    rules
}

pub fn orchestrator(
    rules: RuleMatcher,
    backend: Arc<dyn InferenceBackend>,
    config: FallbackConfig,
) -> Orchestrator {
    let fallback = FallbackClassifier::new(backend, config).expect("valid fallback config");
    Orchestrator::new(Arc::new(rules), fallback)
}
