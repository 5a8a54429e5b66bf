//! Fallback classification for rule misses
//!
//! Unresolved pairs are split into bounded chunks, each chunk is sent to the
//! inference backend on its own task (at most `max_concurrency` in flight),
//! transient failures are retried with exponential backoff, and results are
//! reassembled strictly by chunk index. A chunk that cannot be classified
//! degrades its own items only.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::log_record::{LabelTaxonomy, UNCLASSIFIED};
use crate::traits::{InferenceBackend, InferenceError, ItemOutcome};

/// Exponential backoff with jitter
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per chunk, including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Fraction of the backoff added as random jitter (0.0 disables)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `retry` (1-based), without jitter
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    fn delay_for(&self, retry: u32, err: &InferenceError) -> Duration {
        let base = self.backoff_for(retry);
        let jitter_ms = (base.as_millis() as f64 * self.jitter * rand::random::<f64>()) as u64;
        let delay = base + Duration::from_millis(jitter_ms);
        // Honour the provider's hint, but never wait less than our own backoff
        match err.retry_after() {
            Some(hint) => delay.max(hint.min(self.max_backoff)),
            None => delay,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FallbackConfig {
    /// Maximum number of pairs per backend call
    pub chunk_size: usize,
    /// Maximum number of backend calls in flight
    pub max_concurrency: usize,
    pub retry: RetryPolicy,
    /// Upper bound on a single backend call
    pub call_timeout: Duration,
    /// Labels reported below this confidence become unclassified
    pub min_confidence: f32,
    pub taxonomy: LabelTaxonomy,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            chunk_size: 20,
            max_concurrency: 4,
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(60),
            min_confidence: 0.0,
            taxonomy: LabelTaxonomy::default(),
        }
    }
}

impl FallbackConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunk_size == 0 {
            anyhow::bail!("Fallback chunk size must be at least 1");
        }
        if self.max_concurrency == 0 {
            anyhow::bail!("Fallback concurrency must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("Fallback max attempts must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            anyhow::bail!(
                "Fallback min confidence must be within [0, 1], got {}",
                self.min_confidence
            );
        }
        Ok(())
    }
}

/// Outcome of the fallback for one pair
#[derive(Debug, Clone, PartialEq)]
pub enum FallbackLabel {
    /// The backend produced a label (possibly the sentinel)
    Matched {
        label: String,
        confidence: Option<f32>,
    },
    /// The item could not be classified; carries the reason
    Failed(String),
}

impl FallbackLabel {
    pub fn label(&self) -> &str {
        match self {
            FallbackLabel::Matched { label, .. } => label,
            FallbackLabel::Failed(_) => UNCLASSIFIED,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, FallbackLabel::Failed(_))
    }
}

pub struct FallbackClassifier {
    backend: Arc<dyn InferenceBackend>,
    config: FallbackConfig,
}

impl FallbackClassifier {
    pub fn new(backend: Arc<dyn InferenceBackend>, config: FallbackConfig) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self { backend, config })
    }

    pub fn config(&self) -> &FallbackConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Classify pairs the rule matcher could not resolve.
    ///
    /// Always returns exactly one `FallbackLabel` per input, in input order.
    /// Dropping the returned future aborts every in-flight backend call.
    pub async fn classify_batch(&self, pairs: &[(String, String)]) -> Vec<FallbackLabel> {
        if pairs.is_empty() {
            return Vec::new();
        }

        let chunks: Vec<Vec<(String, String)>> = pairs
            .chunks(self.config.chunk_size)
            .map(|c| c.to_vec())
            .collect();
        let chunk_count = chunks.len();
        let start = Instant::now();

        info!(
            "Fallback: {} records in {} chunks via {} (max concurrency {})",
            pairs.len(),
            chunk_count,
            self.backend.name(),
            self.config.max_concurrency
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut tasks = JoinSet::new();

        for (chunk_index, chunk) in chunks.into_iter().enumerate() {
            let backend = self.backend.clone();
            let semaphore = semaphore.clone();
            let retry = self.config.retry.clone();
            let call_timeout = self.config.call_timeout;

            tasks.spawn(async move {
                // Limits concurrent backend calls; the semaphore is never closed
                let _permit = semaphore.acquire_owned().await.ok();
                let outcome = call_with_retry(backend.as_ref(), &chunk, &retry, call_timeout, chunk_index).await;
                (chunk_index, outcome)
            });
        }

        let mut chunk_results: Vec<Option<Result<Vec<ItemOutcome>, InferenceError>>> =
            (0..chunk_count).map(|_| None).collect();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((chunk_index, outcome)) => chunk_results[chunk_index] = Some(outcome),
                Err(e) => warn!("Fallback chunk task failed: {}", e),
            }
        }

        // Single-threaded assembly keyed by chunk index
        let mut labels = Vec::with_capacity(pairs.len());
        let mut failed_chunks = 0;
        for (chunk_index, chunk) in pairs.chunks(self.config.chunk_size).enumerate() {
            match chunk_results[chunk_index].take() {
                Some(Ok(items)) => {
                    for (item, pair) in items.into_iter().zip(chunk) {
                        labels.push(self.resolve_item(item, pair));
                    }
                }
                Some(Err(e)) => {
                    failed_chunks += 1;
                    let reason = e.to_string();
                    labels.extend(chunk.iter().map(|_| FallbackLabel::Failed(reason.clone())));
                }
                None => {
                    failed_chunks += 1;
                    labels.extend(
                        chunk
                            .iter()
                            .map(|_| FallbackLabel::Failed("fallback task did not complete".into())),
                    );
                }
            }
        }

        info!(
            "Fallback finished in {:?}: {} chunks ok, {} degraded",
            start.elapsed(),
            chunk_count - failed_chunks,
            failed_chunks
        );

        labels
    }

    fn resolve_item(&self, item: ItemOutcome, pair: &(String, String)) -> FallbackLabel {
        let guess = match item {
            Ok(guess) => guess,
            Err(reason) => {
                warn!("Malformed fallback item for source {}: {}", pair.0, reason);
                return FallbackLabel::Failed(reason);
            }
        };

        let Some(label) = self.config.taxonomy.canonical(&guess.label) else {
            warn!(
                "Fallback label '{}' for source {} is outside the taxonomy",
                guess.label, pair.0
            );
            return FallbackLabel::Failed(format!("label '{}' not in taxonomy", guess.label));
        };

        let below_threshold = guess
            .confidence
            .map_or(false, |c| c < self.config.min_confidence);
        if below_threshold {
            debug!(
                "Fallback label '{}' below confidence threshold ({:?} < {})",
                label, guess.confidence, self.config.min_confidence
            );
            return FallbackLabel::Matched {
                label: UNCLASSIFIED.to_string(),
                confidence: guess.confidence,
            };
        }

        FallbackLabel::Matched {
            label: label.to_string(),
            confidence: guess.confidence,
        }
    }
}

async fn call_with_retry(
    backend: &dyn InferenceBackend,
    chunk: &[(String, String)],
    retry: &RetryPolicy,
    call_timeout: Duration,
    chunk_index: usize,
) -> Result<Vec<ItemOutcome>, InferenceError> {
    let mut attempt = 0;

    loop {
        attempt += 1;
        let result = match tokio::time::timeout(call_timeout, backend.classify_batch(chunk)).await {
            Ok(result) => result,
            Err(_) => Err(InferenceError::Timeout(call_timeout)),
        };

        let err = match result {
            Ok(items) if items.len() == chunk.len() => {
                if attempt > 1 {
                    info!("Chunk {} succeeded after {} attempts", chunk_index, attempt);
                }
                return Ok(items);
            }
            Ok(items) => InferenceError::Malformed(format!(
                "backend returned {} labels for {} records",
                items.len(),
                chunk.len()
            )),
            Err(e) => e,
        };

        if !err.is_transient() {
            warn!("Chunk {} failed permanently: {}", chunk_index, err);
            return Err(err);
        }
        if attempt >= retry.max_attempts {
            warn!(
                "Chunk {} failed after {} attempts: {}",
                chunk_index, attempt, err
            );
            return Err(err);
        }

        let delay = retry.delay_for(attempt, &err);
        warn!(
            "Chunk {} attempt {} failed, retrying in {:?}: {}",
            chunk_index, attempt, delay, err
        );
        tokio::time::sleep(delay).await;
    }
}
