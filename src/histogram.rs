use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Histogram {
    pub counts: FxHashMap<String, usize>,
    pub total: usize,
}

impl Histogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_labels<'a, I>(labels: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut hist = Self::new();
        for label in labels {
            hist.add(label);
        }
        hist
    }

    pub fn add(&mut self, label: &str) {
        *self.counts.entry(label.to_string()).or_insert(0) += 1;
        self.total += 1;
    }

    pub fn get_count(&self, label: &str) -> usize {
        self.counts.get(label).copied().unwrap_or(0)
    }

    pub fn distinct(&self) -> usize {
        self.counts.len()
    }

    /// (label, count) sorted by count descending, then label ascending
    pub fn sorted_desc(&self) -> Vec<(String, usize)> {
        let mut entries: Vec<(String, usize)> =
            self.counts.iter().map(|(l, c)| (l.clone(), *c)).collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries
    }

    /// Merge another histogram into this one
    pub fn merge(&mut self, other: &Histogram) {
        for (label, count) in &other.counts {
            *self.counts.entry(label.clone()).or_insert(0) += count;
            self.total += count;
        }
    }
}
