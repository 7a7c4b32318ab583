//! Token usage accounting.

use serde::{Deserialize, Serialize};

/// Usage reported for a single completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageRecord {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// USD cost when the provider can compute it; `None` otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl UsageRecord {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Running aggregate over a turn or a whole process run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageTotals {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost: Option<f64>,
    pub completions: u64,
}

impl UsageTotals {
    /// Fold one completion's usage into the aggregate.
    ///
    /// Cost stays `None` once any completion reported an unknown cost, so
    /// a partial total is never presented as exact.
    pub fn record(&mut self, usage: &UsageRecord) {
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.completions += 1;
        self.cost = match (self.cost, usage.cost) {
            (Some(a), Some(b)) => Some(a + b),
            (None, Some(b)) if self.completions == 1 => Some(b),
            _ => None,
        };
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(p: u64, c: u64, cost: Option<f64>) -> UsageRecord {
        UsageRecord { prompt_tokens: p, completion_tokens: c, cost }
    }

    #[test]
    fn totals_accumulate() {
        let mut totals = UsageTotals::default();
        totals.record(&usage(100, 20, Some(0.01)));
        totals.record(&usage(50, 10, Some(0.02)));
        assert_eq!(totals.prompt_tokens, 150);
        assert_eq!(totals.completion_tokens, 30);
        assert_eq!(totals.total_tokens(), 180);
        assert!((totals.cost.unwrap() - 0.03).abs() < 1e-9);
    }

    #[test]
    fn unknown_cost_poisons_total() {
        let mut totals = UsageTotals::default();
        totals.record(&usage(10, 1, Some(0.01)));
        totals.record(&usage(10, 1, None));
        totals.record(&usage(10, 1, Some(0.05)));
        assert_eq!(totals.cost, None);
        assert_eq!(totals.completions, 3);
    }
}
