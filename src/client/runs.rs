// Run triggering and run status (api key authenticated)

use std::collections::BTreeMap;

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ApiClient, ApiError, AuthType, DEFAULT_API_BASE_URL};

/// Optional parameters of a triggered run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_attributes: Option<BTreeMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_parameters: Option<BTreeMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sprint_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StartedRun {
    id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseStatusSummary {
    pub id: i64,
    pub name: String,
    pub order: u32,
    pub progress: f64,
    pub iterations_failed: u32,
    pub iterations_passed: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    pub id: String,
    pub run_id: String,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    pub status: String,
    #[serde(default)]
    pub progress: f64,
    #[serde(default, rename = "capabilitiesJson")]
    pub capabilities: BTreeMap<String, Value>,
    #[serde(default)]
    pub browser_name: Option<String>,
    #[serde(default)]
    pub browser_version: Option<String>,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub location_name: Option<String>,
    #[serde(default)]
    pub cases_status: Vec<CaseStatusSummary>,
}

/// Live status of a run as reported by the collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRunStatus {
    pub run_id: String,
    #[serde(default)]
    pub entity_id: Option<i64>,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub run_name: Option<String>,
    #[serde(default)]
    pub result_id: Option<i64>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub duration: Option<i64>,
    pub status: String,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub executing_user_name: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub instances: Vec<InstanceStatus>,
}

impl RemoteRunStatus {
    /// Start time as epoch milliseconds
    pub fn start_millis(&self) -> Option<i64> {
        self.start_time.as_deref().and_then(parse_epoch_millis)
    }

    pub fn end_millis(&self) -> Option<i64> {
        self.end_time.as_deref().and_then(parse_epoch_millis)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status.as_str(), "Finished" | "Canceled")
    }
}

fn parse_epoch_millis(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

#[derive(Debug, Clone)]
pub struct RunsApi {
    client: ApiClient,
}

impl RunsApi {
    pub fn new(token: &str, base_url: Option<&str>) -> Result<Self, ApiError> {
        let base_url = base_url.unwrap_or(DEFAULT_API_BASE_URL);
        Ok(Self {
            client: ApiClient::new(base_url, token, AuthType::ApiKey)?,
        })
    }

    /// Returns the new run id, or `None` when the case does not exist
    pub async fn run_test_case(
        &self,
        case_id: i64,
        options: &RunOptions,
    ) -> Result<Option<String>, ApiError> {
        self.start(&format!("/cases/{}/run", case_id), options).await
    }

    pub async fn run_test_suite(
        &self,
        suite_id: i64,
        options: &RunOptions,
    ) -> Result<Option<String>, ApiError> {
        self.start(&format!("/suites/{}/run", suite_id), options).await
    }

    pub async fn run_monitor(
        &self,
        monitor_id: &str,
        options: &RunOptions,
    ) -> Result<Option<String>, ApiError> {
        self.start(&format!("/monitors/{}/run", monitor_id), options)
            .await
    }

    pub async fn get_run_status(&self, run_id: &str) -> Result<RemoteRunStatus, ApiError> {
        let path = format!("/runs/{}", run_id);
        let response = ApiClient::check(self.client.get(&path).await?).await?;
        ApiClient::data(response)
            .await?
            .ok_or_else(|| ApiError::EmptyResponse("no data received".to_string()))
    }

    async fn start(&self, path: &str, options: &RunOptions) -> Result<Option<String>, ApiError> {
        let response = self.client.post(path, options).await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let response = ApiClient::check(response).await?;
        let started: Option<StartedRun> = ApiClient::data(response).await?;
        match started.and_then(|s| s.id) {
            Some(id) => Ok(Some(id)),
            None => Err(ApiError::EmptyResponse(
                "\"data.id\" is missing".to_string(),
            )),
        }
    }
}
