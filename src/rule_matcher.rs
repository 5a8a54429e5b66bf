//! Source-keyed rule matching
//!
//! Each source owns an ordered list of (pattern, label) rules. The first rule
//! whose pattern matches the message wins. Patterns are compiled with the
//! `regex` crate, which never backtracks, so matching is linear in the
//! message length. Compiled programs are capped by `MatcherConfig::size_limit`.

use crate::log_record::LogRecord;
use crate::matcher_config::MatcherConfig;
use rayon::prelude::*;
use regex::{RegexSet, RegexSetBuilder};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule source must not be empty")]
    EmptySource,

    #[error("rule label must not be empty (source '{0}')")]
    EmptyLabel(String),

    #[error("invalid pattern for source '{source_name}': {pattern}: {reason}")]
    InvalidPattern {
        source_name: String,
        pattern: String,
        reason: String,
    },

    #[error("failed to read rule file {path}: {err}")]
    Io {
        path: String,
        #[source]
        err: std::io::Error,
    },

    #[error("failed to parse rule file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Serialized form of one rule, as found in a rule file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub source: String,
    pub pattern: String,
    pub label: String,
}

impl RuleSpec {
    pub fn new(source: &str, pattern: &str, label: &str) -> Self {
        Self {
            source: source.to_string(),
            pattern: pattern.to_string(),
            label: label.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    pub label: String,
    /// Position of the winning rule within its source's ruleset
    pub rule_index: usize,
}

#[derive(Debug, Clone)]
struct Ruleset {
    patterns: Vec<String>,
    labels: Vec<String>,
    set: RegexSet,
}

impl Ruleset {
    fn first_match(&self, message: &str) -> Option<RuleMatch> {
        // SetMatches iterates in ascending pattern order
        let index = self.set.matches(message).iter().next()?;
        Some(RuleMatch {
            label: self.labels[index].clone(),
            rule_index: index,
        })
    }
}

static DEFAULT_SOURCES: &[&str] = &[
    "ModernCRM",
    "AnalyticsEngine",
    "ModernHR",
    "BillingSystem",
    "ThirdPartyAPI",
];

static DEFAULT_RULES: &[(&str, &str)] = &[
    (r"(?i)User User\d+ logged (in|out)\.", "User Action"),
    (r"(?i)Account with ID .+ created by .+", "User Action"),
    (r"(?i)Backup (started|ended) at .+", "System Notification"),
    (r"(?i)Backup completed successfully\.", "System Notification"),
    (r"(?i)System updated to version .+", "System Notification"),
    (r"(?i)File .+ uploaded successfully by user .+", "System Notification"),
    (r"(?i)Disk cleanup completed successfully\.", "System Notification"),
    (r"(?i)System reboot initiated by user .+", "System Notification"),
];

pub struct RuleMatcher {
    rulesets: FxHashMap<String, Ruleset>,
    config: MatcherConfig,
}

impl RuleMatcher {
    pub fn new() -> Self {
        Self::with_config(MatcherConfig::default())
    }

    pub fn with_config(config: MatcherConfig) -> Self {
        Self {
            rulesets: FxHashMap::default(),
            config,
        }
    }

    /// Matcher preloaded with the built-in rules for the well-known modern sources
    pub fn with_default_rules() -> Self {
        let mut matcher = Self::new();
        for source in DEFAULT_SOURCES {
            for (pattern, label) in DEFAULT_RULES.iter() {
                // Built-in patterns are static and known to compile
                if let Err(e) = matcher.add_rule(source, pattern, label) {
                    tracing::error!("Built-in rule rejected: {}", e);
                }
            }
        }
        matcher
    }

    pub fn from_specs<I>(specs: I) -> Result<Self, RuleError>
    where
        I: IntoIterator<Item = RuleSpec>,
    {
        Self::from_specs_with_config(specs, MatcherConfig::default())
    }

    pub fn from_specs_with_config<I>(specs: I, config: MatcherConfig) -> Result<Self, RuleError>
    where
        I: IntoIterator<Item = RuleSpec>,
    {
        let mut grouped: Vec<(String, Vec<(String, String)>)> = Vec::new();
        for spec in specs {
            match grouped.iter_mut().find(|(source, _)| *source == spec.source) {
                Some((_, rules)) => rules.push((spec.pattern, spec.label)),
                None => grouped.push((spec.source, vec![(spec.pattern, spec.label)])),
            }
        }

        let mut matcher = Self::with_config(config);
        for (source, rules) in grouped {
            matcher.extend_ruleset(&source, rules)?;
        }
        Ok(matcher)
    }

    /// Load a JSON rule file: `[{"source": .., "pattern": .., "label": ..}, ..]`
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, RuleError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|err| RuleError::Io {
            path: path.display().to_string(),
            err,
        })?;
        let specs: Vec<RuleSpec> = serde_json::from_str(&content)?;
        let matcher = Self::from_specs(specs)?;
        tracing::info!(
            "Loaded {} rules for {} sources from {}",
            matcher.rule_count(),
            matcher.rulesets.len(),
            path.display()
        );
        Ok(matcher)
    }

    /// Append a rule to the end of `source`'s ruleset
    pub fn add_rule(&mut self, source: &str, pattern: &str, label: &str) -> Result<(), RuleError> {
        self.extend_ruleset(source, vec![(pattern.to_string(), label.to_string())])
    }

    fn extend_ruleset(
        &mut self,
        source: &str,
        rules: Vec<(String, String)>,
    ) -> Result<(), RuleError> {
        if source.trim().is_empty() {
            return Err(RuleError::EmptySource);
        }

        let (mut patterns, mut labels) = match self.rulesets.get(source) {
            Some(existing) => (existing.patterns.clone(), existing.labels.clone()),
            None => (Vec::new(), Vec::new()),
        };

        for (pattern, label) in rules {
            if label.trim().is_empty() {
                return Err(RuleError::EmptyLabel(source.to_string()));
            }
            // Compile alone first so the error names the offending pattern
            self.build_set(std::slice::from_ref(&pattern))
                .map_err(|e| RuleError::InvalidPattern {
                    source_name: source.to_string(),
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })?;
            patterns.push(pattern);
            labels.push(label);
        }

        let set = self.build_set(&patterns).map_err(|e| RuleError::InvalidPattern {
            source_name: source.to_string(),
            pattern: patterns.join(" | "),
            reason: e.to_string(),
        })?;

        tracing::debug!("Ruleset for {} now has {} rules", source, patterns.len());
        self.rulesets
            .insert(source.to_string(), Ruleset { patterns, labels, set });
        Ok(())
    }

    fn build_set(&self, patterns: &[String]) -> Result<RegexSet, regex::Error> {
        RegexSetBuilder::new(patterns)
            .size_limit(self.config.size_limit)
            .dfa_size_limit(self.config.dfa_size_limit)
            .case_insensitive(self.config.case_insensitive)
            .build()
    }

    /// Classify one pair. `None` when the source has no ruleset or no rule hits.
    pub fn match_record(&self, source: &str, message: &str) -> Option<RuleMatch> {
        self.rulesets.get(source)?.first_match(message)
    }

    /// Order-preserving batch match; large batches run on the rayon pool
    pub fn match_batch(&self, records: &[LogRecord]) -> Vec<Option<RuleMatch>> {
        if records.len() > self.config.parallel_threshold {
            records
                .par_iter()
                .map(|r| self.match_record(&r.source, &r.message))
                .collect()
        } else {
            records
                .iter()
                .map(|r| self.match_record(&r.source, &r.message))
                .collect()
        }
    }

    pub fn rule_count(&self) -> usize {
        self.rulesets.values().map(|r| r.patterns.len()).sum()
    }

    pub fn sources(&self) -> Vec<&str> {
        let mut sources: Vec<&str> = self.rulesets.keys().map(|s| s.as_str()).collect();
        sources.sort_unstable();
        sources
    }

    /// Rules in registration order for one source
    pub fn rules_for(&self, source: &str) -> Vec<RuleSpec> {
        self.rulesets
            .get(source)
            .map(|r| {
                r.patterns
                    .iter()
                    .zip(&r.labels)
                    .map(|(p, l)| RuleSpec::new(source, p, l))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }
}

impl Default for RuleMatcher {
    fn default() -> Self {
        Self::new()
    }
}
