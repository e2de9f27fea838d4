// Step results

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Attachment, FailureResult, ResultStatus, StepType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GherkinKeyword {
    Given,
    When,
    Then,
}

impl GherkinKeyword {
    /// Map a pickle step type (`Context`, `Action`, `Outcome`)
    pub fn from_pickle_type(step_type: &str) -> Option<Self> {
        match step_type {
            "Context" => Some(Self::Given),
            "Action" => Some(Self::When),
            "Outcome" => Some(Self::Then),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GherkinStepExtra {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub keyword: Option<GherkinKeyword>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertStepExtra {
    #[serde(default)]
    pub actual: Value,
    #[serde(default)]
    pub expected: Value,
}

/// Framework specific details carried by a step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepExtra {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gherkin: Option<GherkinStepExtra>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assert: Option<AssertStepExtra>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fqn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub start_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ResultStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureResult>,
    #[serde(rename = "screenShot", skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<StepExtra>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl StepResult {
    /// True when this step or any nested step resolved to `FAILED`
    pub fn has_failure(&self) -> bool {
        self.status == Some(ResultStatus::Failed) || self.steps.iter().any(Self::has_failure)
    }

    /// Number of steps in this subtree, this one included
    pub fn count(&self) -> usize {
        1 + self.steps.iter().map(Self::count).sum::<usize>()
    }
}

/// True when none of the steps, at any depth, failed
pub fn has_no_failed_steps(steps: &[StepResult]) -> bool {
    !steps.iter().any(StepResult::has_failure)
}
