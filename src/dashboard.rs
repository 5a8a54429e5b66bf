//! Dashboard operations over a labeled table
//!
//! Summary counts, label frequency, multi-value filters on label and source,
//! and case-insensitive message search. Rendering lives in the
//! `log-dashboard` binary; everything here is pure.

use aho_corasick::AhoCorasick;
use std::collections::BTreeSet;

use crate::histogram::Histogram;
use crate::table::{LogTable, TableError, LABEL_COLUMN, MESSAGE_COLUMN, SOURCE_COLUMN};

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub total_logs: usize,
    pub unique_labels: usize,
    /// Label frequency, most common first
    pub label_counts: Vec<(String, usize)>,
}

#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub labels: Vec<String>,
    pub sources: Vec<String>,
    pub search: Option<String>,
}

impl LogFilter {
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
            && self.sources.is_empty()
            && self.search.as_deref().map_or(true, str::is_empty)
    }
}

/// A classified table as returned by the upload endpoint
#[derive(Debug, Clone)]
pub struct LabeledTable {
    table: LogTable,
    label_idx: usize,
    source_idx: usize,
    message_idx: usize,
}

impl LabeledTable {
    pub fn new(table: LogTable) -> Result<Self, TableError> {
        let missing: Vec<String> = [SOURCE_COLUMN, MESSAGE_COLUMN, LABEL_COLUMN]
            .iter()
            .filter(|c| table.column_index(c).is_none())
            .map(|c| c.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(TableError::MissingColumns(missing));
        }

        Ok(Self {
            label_idx: table.column_index(LABEL_COLUMN).unwrap_or_default(),
            source_idx: table.column_index(SOURCE_COLUMN).unwrap_or_default(),
            message_idx: table.column_index(MESSAGE_COLUMN).unwrap_or_default(),
            table,
        })
    }

    pub fn from_csv_bytes(bytes: &[u8]) -> Result<Self, TableError> {
        Self::new(LogTable::from_csv_bytes(bytes)?)
    }

    pub fn table(&self) -> &LogTable {
        &self.table
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn histogram(&self) -> Histogram {
        Histogram::from_labels(self.table.rows().iter().map(|r| r[self.label_idx].as_str()))
    }

    pub fn summary(&self) -> Summary {
        let hist = self.histogram();
        Summary {
            total_logs: self.table.len(),
            unique_labels: hist.distinct(),
            label_counts: hist.sorted_desc(),
        }
    }

    /// Distinct labels, sorted; the options offered by the label filter
    pub fn label_options(&self) -> Vec<String> {
        self.distinct(self.label_idx)
    }

    pub fn source_options(&self) -> Vec<String> {
        self.distinct(self.source_idx)
    }

    fn distinct(&self, idx: usize) -> Vec<String> {
        self.table
            .rows()
            .iter()
            .map(|r| r[idx].clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Rows matching every active filter. Empty label/source lists and an
    /// empty search term do not filter.
    pub fn filter(&self, filter: &LogFilter) -> LogTable {
        let search = filter
            .search
            .as_deref()
            .filter(|s| !s.is_empty())
            .and_then(|s| {
                AhoCorasick::builder()
                    .ascii_case_insensitive(true)
                    .build([s.to_lowercase()])
                    .ok()
                    .map(|ac| (ac, s.to_lowercase()))
            });

        self.table.filter_rows(|row| {
            if !filter.labels.is_empty() && !filter.labels.contains(&row[self.label_idx]) {
                return false;
            }
            if !filter.sources.is_empty() && !filter.sources.contains(&row[self.source_idx]) {
                return false;
            }
            match &search {
                Some((ac, needle)) => {
                    let message = &row[self.message_idx];
                    // ASCII fast path, full Unicode folding otherwise
                    if message.is_ascii() && needle.is_ascii() {
                        ac.is_match(message)
                    } else {
                        message.to_lowercase().contains(needle.as_str())
                    }
                }
                None => true,
            }
        })
    }
}

/// Horizontal bar chart of label counts, longest bar `width` characters
pub fn render_bar_chart(counts: &[(String, usize)], width: usize) -> String {
    let max = counts.iter().map(|(_, c)| *c).max().unwrap_or(0);
    let label_width = counts.iter().map(|(l, _)| l.chars().count()).max().unwrap_or(0);

    let mut out = String::new();
    for (label, count) in counts {
        let bar_len = if max == 0 { 0 } else { (count * width).div_ceil(max) };
        out.push_str(&format!(
            "{:<label_width$} | {} {}\n",
            label,
            "█".repeat(bar_len),
            count,
            label_width = label_width
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const LABELED: &str = "source,log_message,target_label\n\
        ModernCRM,User User1 logged in.,User Action\n\
        LegacyCRM,Case escalation FAILED,Workflow Error\n\
        BillingSystem,Backup completed successfully.,System Notification\n\
        ModernCRM,User User2 logged out.,User Action\n";

    fn table() -> LabeledTable {
        LabeledTable::from_csv_bytes(LABELED.as_bytes()).unwrap()
    }

    #[test]
    fn test_summary() {
        let summary = table().summary();
        assert_eq!(summary.total_logs, 4);
        assert_eq!(summary.unique_labels, 3);
        assert_eq!(summary.label_counts[0], ("User Action".to_string(), 2));
    }

    #[test]
    fn test_filters_combine() {
        let t = table();
        let filtered = t.filter(&LogFilter {
            labels: vec!["User Action".into(), "Workflow Error".into()],
            sources: vec!["ModernCRM".into()],
            search: None,
        });
        assert_eq!(filtered.len(), 2);
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let t = table();
        let filtered = t.filter(&LogFilter {
            search: Some("escalation failed".into()),
            ..Default::default()
        });
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.rows()[0][0], "LegacyCRM");
    }

    #[test]
    fn test_empty_filter_keeps_everything() {
        let t = table();
        let filter = LogFilter {
            search: Some(String::new()),
            ..Default::default()
        };
        assert!(filter.is_empty());
        assert_eq!(t.filter(&filter).len(), 4);
    }

    #[test]
    fn test_options_sorted() {
        assert_eq!(
            table().source_options(),
            vec!["BillingSystem", "LegacyCRM", "ModernCRM"]
        );
    }

    #[test]
    fn test_requires_label_column() {
        assert!(LabeledTable::from_csv_bytes(b"source,log_message\na,b\n").is_err());
    }

    #[test]
    fn test_bar_chart() {
        let chart = render_bar_chart(&[("A".into(), 4), ("BB".into(), 2)], 8);
        let lines: Vec<&str> = chart.lines().collect();
        assert_eq!(lines[0], "A  | ████████ 4");
        assert_eq!(lines[1], "BB | ████ 2");
    }
}
