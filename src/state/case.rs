// Case results

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Attachment, FailureResult, LogEntry, ResultStatus, StepResult};

/// Named piece of output data produced by a test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputData {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Data")]
    pub data: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseContext {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub result_data: Vec<OutputData>,
}

/// One executed test / scenario attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseResult {
    pub id: String,
    pub fqn: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub start_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    pub iteration_num: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ResultStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason_id: Option<u32>,
    #[serde(default)]
    pub re_run_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<CaseContext>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<LogEntry>,
    #[serde(default)]
    pub steps: Vec<StepResult>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub test_attributes: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl CaseResult {
    pub fn is_failed(&self) -> bool {
        self.status == Some(ResultStatus::Failed)
    }

    /// Every step in the case, depth first
    pub fn all_steps(&self) -> Vec<&StepResult> {
        fn walk<'a>(steps: &'a [StepResult], out: &mut Vec<&'a StepResult>) {
            for step in steps {
                out.push(step);
                walk(&step.steps, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.steps, &mut out);
        out
    }
}
