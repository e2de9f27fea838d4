// Suite results

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{CaseResult, FailureResult, ResultStatus, StepResult};

/// Grouping node: a file, a feature or a describe block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteResult {
    pub id: String,
    pub name: String,
    pub fqn: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub start_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    pub iteration_num: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ResultStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureResult>,
    #[serde(default)]
    pub cases: Vec<CaseResult>,
    #[serde(default)]
    pub suites: Vec<SuiteResult>,
    #[serde(default)]
    pub hooks: Vec<StepResult>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub test_attributes: BTreeMap<String, Value>,
}

impl SuiteResult {
    /// True when any case or step below this suite failed
    pub fn has_failed_descendant(&self) -> bool {
        self.cases
            .iter()
            .any(|c| c.is_failed() || c.steps.iter().any(StepResult::has_failure))
            || self.hooks.iter().any(StepResult::has_failure)
            || self.suites.iter().any(Self::has_failed_descendant)
    }

    /// Cases of this suite and all nested suites, depth first
    pub fn all_cases(&self) -> Vec<&CaseResult> {
        let mut out: Vec<&CaseResult> = self.cases.iter().collect();
        for suite in &self.suites {
            out.extend(suite.all_cases());
        }
        out
    }
}
