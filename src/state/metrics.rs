// Run counters

use serde::Serialize;

use super::ResultStatus;

/// Outcome counters for one kind of entity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: Option<ResultStatus>) {
        self.total += 1;
        match status {
            Some(ResultStatus::Passed) => self.passed += 1,
            Some(ResultStatus::Failed) => self.failed += 1,
            Some(ResultStatus::Skipped) => self.skipped += 1,
            None => {}
        }
    }
}

/// Live counters maintained while events are reduced
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunMetrics {
    pub cases: StatusCounts,
    pub steps: StatusCounts,
    pub total_cases: Option<u32>,
    pub dropped_attachments: usize,
}

impl RunMetrics {
    pub fn has_failures(&self) -> bool {
        self.cases.failed > 0 || self.steps.failed > 0
    }

    /// Percentage of expected cases that finished, when the total is known
    pub fn progress(&self) -> f64 {
        match self.total_cases {
            Some(total) if total > 0 => {
                ((self.cases.total as f64 / total as f64) * 100.0).min(100.0)
            }
            _ => 0.0,
        }
    }
}

/// Counts derived from a finished tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub suites: usize,
    pub cases: StatusCounts,
    pub steps: StatusCounts,
    pub duration_ms: i64,
}

impl RunSummary {
    /// Pass rate over executed (non-skipped) cases
    pub fn pass_rate(&self) -> f64 {
        let executed = self.cases.passed + self.cases.failed;
        if executed == 0 {
            0.0
        } else {
            (self.cases.passed as f64 / executed as f64) * 100.0
        }
    }
}
