use crate::eval::evaluator::DEFAULT_MAX_DEPTH;

/// Default cap on synthetic rows explored per policy by sampling rules.
pub const DEFAULT_MAX_SAMPLE_ROWS: usize = 256;

/// Knobs for one analysis or simulation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalyzerConfig {
    /// Size of the rule engine's worker pool.
    pub worker_threads: usize,
    /// Nesting budget for correlated subqueries.
    pub max_depth: usize,
    /// Cap on synthetic rows explored per policy.
    pub max_sample_rows: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            worker_threads: std::thread::available_parallelism().map_or(1, usize::from),
            max_depth: DEFAULT_MAX_DEPTH,
            max_sample_rows: DEFAULT_MAX_SAMPLE_ROWS,
        }
    }
}

impl AnalyzerConfig {
    /// Override the values that are `Some`; zero is raised to one.
    pub fn with_overrides(
        mut self,
        worker_threads: Option<usize>,
        max_depth: Option<usize>,
        max_sample_rows: Option<usize>,
    ) -> Self {
        if let Some(n) = worker_threads {
            self.worker_threads = n.max(1);
        }
        if let Some(n) = max_depth {
            self.max_depth = n.max(1);
        }
        if let Some(n) = max_sample_rows {
            self.max_sample_rows = n.max(1);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_positive() {
        let config = AnalyzerConfig::default();
        assert!(config.worker_threads >= 1);
        assert_eq!(config.max_depth, 16);
        assert_eq!(config.max_sample_rows, 256);
    }

    #[test]
    fn overrides_apply_and_clamp() {
        let config = AnalyzerConfig::default().with_overrides(Some(0), None, Some(8));
        assert_eq!(config.worker_threads, 1);
        assert_eq!(config.max_depth, 16);
        assert_eq!(config.max_sample_rows, 8);
    }
}
