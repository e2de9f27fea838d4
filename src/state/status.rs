// Status enumerations shared by the result tree and live updates

use serde::{Deserialize, Serialize};

/// Terminal outcome of a run, suite, case or step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    Passed,
    Failed,
    Skipped,
}

impl ResultStatus {
    /// Map a framework's native status string: passed and skipped are
    /// recognised, anything else counts as a failure.
    pub fn from_native(status: &str) -> Self {
        if status.eq_ignore_ascii_case("passed") {
            Self::Passed
        } else if status.eq_ignore_ascii_case("skipped") {
            Self::Skipped
        } else {
            Self::Failed
        }
    }

    pub fn is_failed(self) -> bool {
        self == Self::Failed
    }

    /// Combine with another status, only ever moving towards `Failed`.
    pub fn escalate(self, other: ResultStatus) -> Self {
        match (self, other) {
            (Self::Failed, _) | (_, Self::Failed) => Self::Failed,
            (Self::Passed, _) | (_, Self::Passed) => Self::Passed,
            _ => Self::Skipped,
        }
    }
}

/// Live lifecycle state reported to the collector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Pending,
    Initializing,
    Running,
    Finished,
    Canceled,
}

/// Kind of a recorded step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepType {
    #[default]
    General,
    Assertion,
    Hook,
    Transaction,
    Gherkin,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_native_mapping() {
        assert_eq!(ResultStatus::from_native("passed"), ResultStatus::Passed);
        assert_eq!(ResultStatus::from_native("PASSED"), ResultStatus::Passed);
        assert_eq!(ResultStatus::from_native("skipped"), ResultStatus::Skipped);
        assert_eq!(ResultStatus::from_native("timedOut"), ResultStatus::Failed);
        assert_eq!(ResultStatus::from_native("UNDEFINED"), ResultStatus::Failed);
    }

    #[test]
    fn test_escalate_never_leaves_failed() {
        assert_eq!(
            ResultStatus::Failed.escalate(ResultStatus::Passed),
            ResultStatus::Failed
        );
        assert_eq!(
            ResultStatus::Skipped.escalate(ResultStatus::Passed),
            ResultStatus::Passed
        );
        assert_eq!(
            ResultStatus::Skipped.escalate(ResultStatus::Skipped),
            ResultStatus::Skipped
        );
    }

    #[test]
    fn test_serialized_names() {
        assert_eq!(
            serde_json::to_string(&ResultStatus::Failed).unwrap(),
            "\"FAILED\""
        );
        assert_eq!(
            serde_json::to_string(&StepType::Transaction).unwrap(),
            "\"TRANSACTION\""
        );
        assert_eq!(
            serde_json::to_string(&RunStatus::Running).unwrap(),
            "\"Running\""
        );
    }
}
