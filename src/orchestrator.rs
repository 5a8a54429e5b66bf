use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::fallback::{FallbackClassifier, FallbackLabel};
use crate::log_record::{ClassificationResult, LogRecord, Strategy};
use crate::rule_matcher::RuleMatcher;

/// Lifecycle of a single record inside one `classify` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Pending,
    RuleMatched,
    SentToFallback,
    FallbackMatched,
    FallbackFailed,
    Resolved,
}

/// Per-batch counters, logged after every run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassificationReport {
    pub total: usize,
    pub rule_matched: usize,
    pub fallback_matched: usize,
    pub failed: usize,
    pub unclassified: usize,
    pub elapsed_ms: u128,
}

impl ClassificationReport {
    pub fn from_results(results: &[ClassificationResult], elapsed_ms: u128) -> Self {
        let count = |s: Strategy| results.iter().filter(|r| r.strategy == s).count();
        Self {
            total: results.len(),
            rule_matched: count(Strategy::Rule),
            fallback_matched: count(Strategy::Fallback),
            failed: count(Strategy::Error),
            unclassified: results.iter().filter(|r| r.is_unclassified()).count(),
            elapsed_ms,
        }
    }
}

pub struct Orchestrator {
    rules: Arc<RuleMatcher>,
    fallback: FallbackClassifier,
}

impl Orchestrator {
    pub fn new(rules: Arc<RuleMatcher>, fallback: FallbackClassifier) -> Self {
        Self { rules, fallback }
    }

    pub fn rules(&self) -> &RuleMatcher {
        &self.rules
    }

    pub fn fallback(&self) -> &FallbackClassifier {
        &self.fallback
    }

    /// Classify a batch. The output has the same length and order as `batch`
    /// and every record ends up `Resolved`, whatever the fallback does.
    pub async fn classify(&self, batch: &[LogRecord]) -> Vec<ClassificationResult> {
        let start = Instant::now();
        let mut states = vec![RecordState::Pending; batch.len()];
        let mut slots: Vec<Option<ClassificationResult>> = vec![None; batch.len()];

        // Rule pass
        let rule_hits = self.rules.match_batch(batch);
        let mut unresolved: Vec<usize> = Vec::new();
        for (index, hit) in rule_hits.into_iter().enumerate() {
            match hit {
                Some(hit) => {
                    states[index] = RecordState::RuleMatched;
                    slots[index] = Some(ClassificationResult::rule(batch[index].clone(), hit.label));
                }
                None => {
                    states[index] = RecordState::SentToFallback;
                    unresolved.push(index);
                }
            }
        }

        debug!(
            "Rule pass: {} matched, {} sent to fallback",
            batch.len() - unresolved.len(),
            unresolved.len()
        );

        // Fallback pass, unresolved records in original relative order
        if !unresolved.is_empty() {
            let pairs: Vec<(String, String)> = unresolved
                .iter()
                .map(|&i| (batch[i].source.clone(), batch[i].message.clone()))
                .collect();
            let labels = self.fallback.classify_batch(&pairs).await;

            for (&index, label) in unresolved.iter().zip(labels) {
                let record = batch[index].clone();
                slots[index] = Some(match label {
                    FallbackLabel::Matched { label, confidence } => {
                        states[index] = RecordState::FallbackMatched;
                        ClassificationResult::fallback(record, label, confidence)
                    }
                    FallbackLabel::Failed(reason) => {
                        debug!("Record {} degraded: {}", index, reason);
                        states[index] = RecordState::FallbackFailed;
                        ClassificationResult::error(record)
                    }
                });
            }
        }

        // Merge by original index; anything still empty is degraded
        let results: Vec<ClassificationResult> = slots
            .into_iter()
            .zip(states.iter_mut())
            .enumerate()
            .map(|(index, (slot, state))| {
                *state = RecordState::Resolved;
                slot.unwrap_or_else(|| ClassificationResult::error(batch[index].clone()))
            })
            .collect();

        debug_assert!(states.iter().all(|s| *s == RecordState::Resolved));

        let report = ClassificationReport::from_results(&results, start.elapsed().as_millis());
        info!(
            "Classified {} records in {}ms: {} rule, {} fallback, {} error ({} unclassified)",
            report.total,
            report.elapsed_ms,
            report.rule_matched,
            report.fallback_matched,
            report.failed,
            report.unclassified
        );

        results
    }
}

/// The label column, in order
pub fn labels(results: &[ClassificationResult]) -> Vec<String> {
    results.iter().map(|r| r.label.clone()).collect()
}
