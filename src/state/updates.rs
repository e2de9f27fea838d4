// Incremental status payloads pushed to the collector

use serde::{Deserialize, Serialize};

use super::{FailureResult, ResultStatus, RunStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseStatusUpdate {
    pub timestamp: i64,
    pub run_id: String,
    pub instance_id: String,
    pub id: String,
    pub fqn: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_fqn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_name: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration_num: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    pub run_status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_status: Option<ResultStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub re_run_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailureResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteStatusUpdate {
    pub timestamp: i64,
    pub run_id: String,
    pub instance_id: String,
    pub id: String,
    pub fqn: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_fqn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_name: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    pub run_status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_status: Option<ResultStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailureResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Progress of the case currently executing on an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseProgress {
    pub id: String,
    pub name: String,
    pub order: u32,
    pub iterations_passed: u32,
    pub iterations_failed: u32,
    pub progress: f64,
    #[serde(default)]
    pub failures: Vec<FailureResult>,
}

/// Compact run status snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatusInfo {
    pub run_id: String,
    pub instance_id: String,
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    pub status: RunStatus,
    pub progress: f64,
    pub case: Option<CaseProgress>,
}
