use serde::{Deserialize, Serialize};

/// Sentinel label for records no strategy could resolve
pub const UNCLASSIFIED: &str = "unclassified";

/// A single (source, message) pair read from an uploaded batch
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogRecord {
    pub source: String,
    pub message: String,
}

impl LogRecord {
    pub fn new(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
        }
    }
}

/// Which path produced a label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Rule,
    Fallback,
    Error,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Rule => "rule",
            Strategy::Fallback => "fallback",
            Strategy::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub record: LogRecord,
    pub label: String,
    pub strategy: Strategy,
    pub confidence: Option<f32>,
}

impl ClassificationResult {
    pub fn rule(record: LogRecord, label: impl Into<String>) -> Self {
        Self {
            record,
            label: label.into(),
            strategy: Strategy::Rule,
            confidence: Some(1.0),
        }
    }

    pub fn fallback(record: LogRecord, label: impl Into<String>, confidence: Option<f32>) -> Self {
        Self {
            record,
            label: label.into(),
            strategy: Strategy::Fallback,
            confidence,
        }
    }

    /// Degraded result: label is always the sentinel
    pub fn error(record: LogRecord) -> Self {
        Self {
            record,
            label: UNCLASSIFIED.to_string(),
            strategy: Strategy::Error,
            confidence: None,
        }
    }

    pub fn is_unclassified(&self) -> bool {
        self.label == UNCLASSIFIED
    }
}

/// Bounded, ordered label set the fallback is allowed to assign
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelTaxonomy {
    labels: Vec<String>,
}

impl LabelTaxonomy {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for label in labels {
            let label: String = label.into();
            let label = label.trim().to_string();
            if label.is_empty() || out.iter().any(|l| l.eq_ignore_ascii_case(&label)) {
                continue;
            }
            out.push(label);
        }
        Self { labels: out }
    }

    /// Parse a comma separated list, e.g. from `LABEL_TAXONOMY`
    pub fn parse(list: &str) -> Self {
        Self::new(list.split(','))
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Resolve a label returned by a model to its canonical spelling.
    /// The sentinel is always accepted.
    pub fn canonical(&self, label: &str) -> Option<&str> {
        let label = label.trim();
        if label.eq_ignore_ascii_case(UNCLASSIFIED) {
            return Some(UNCLASSIFIED);
        }
        self.labels
            .iter()
            .find(|l| l.eq_ignore_ascii_case(label))
            .map(|l| l.as_str())
    }
}

impl Default for LabelTaxonomy {
    fn default() -> Self {
        Self::new([
            "Workflow Error",
            "Deprecation Warning",
            "User Action",
            "System Notification",
            "Security Alert",
            "Critical Error",
            "Error",
            "HTTP Status",
            "Resource Usage",
        ])
    }
}
