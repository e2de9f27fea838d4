// Run result - root of the result tree

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{CaseResult, ResultStatus, RunSummary, StatusCounts, SuiteResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub run_id: String,
    pub instance_id: String,
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,
    pub start_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ResultStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cases: Option<u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub capabilities: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    #[serde(default)]
    pub suites: Vec<SuiteResult>,
}

impl RunResult {
    /// All suites in the tree, depth first
    pub fn all_suites(&self) -> Vec<&SuiteResult> {
        fn walk<'a>(suites: &'a [SuiteResult], out: &mut Vec<&'a SuiteResult>) {
            for suite in suites {
                out.push(suite);
                walk(&suite.suites, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.suites, &mut out);
        out
    }

    /// All cases in the tree, depth first
    pub fn all_cases(&self) -> Vec<&CaseResult> {
        self.suites.iter().flat_map(|s| s.all_cases()).collect()
    }

    /// Find a suite by fully-qualified name
    pub fn find_suite(&self, fqn: &str) -> Option<&SuiteResult> {
        self.all_suites().into_iter().find(|s| s.fqn == fqn)
    }

    /// Count outcomes over the finished tree
    pub fn summary(&self) -> RunSummary {
        let mut cases = StatusCounts::default();
        let mut steps = StatusCounts::default();
        for case in self.all_cases() {
            cases.record(case.status);
            for step in case.all_steps() {
                steps.record(step.status);
            }
        }
        RunSummary {
            suites: self.all_suites().len(),
            cases,
            steps,
            duration_ms: self.duration.unwrap_or(0),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == Some(ResultStatus::Failed)
    }
}
