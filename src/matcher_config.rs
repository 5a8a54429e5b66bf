use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Upper bound on a compiled ruleset program, in bytes
    pub size_limit: usize,
    /// Upper bound on the lazy DFA cache, in bytes
    pub dfa_size_limit: usize,
    /// Batches larger than this are matched on the rayon pool
    pub parallel_threshold: usize,
    pub case_insensitive: bool,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            size_limit: 1 << 20,
            dfa_size_limit: 2 << 20,
            parallel_threshold: 1_000,
            case_insensitive: false,
        }
    }
}

impl MatcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never go parallel; useful for tiny deployments and deterministic profiling
    pub fn sequential() -> Self {
        Self {
            parallel_threshold: usize::MAX,
            ..Default::default()
        }
    }

    pub fn with_size_limit(mut self, bytes: usize) -> Self {
        self.size_limit = bytes.max(1024);
        self
    }

    pub fn with_dfa_size_limit(mut self, bytes: usize) -> Self {
        self.dfa_size_limit = bytes.max(1024);
        self
    }

    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }

    pub fn with_case_insensitive(mut self, enabled: bool) -> Self {
        self.case_insensitive = enabled;
        self
    }
}
