// Live reporting endpoints (bearer authenticated)

use super::{ApiClient, ApiError, AuthType};
use crate::state::{CaseStatusUpdate, RunResult, RunStatusInfo, SuiteStatusUpdate};

#[derive(Debug, Clone)]
pub struct RuntimeApi {
    client: ApiClient,
}

impl RuntimeApi {
    pub fn new(base_url: &str, token: &str) -> Result<Self, ApiError> {
        Ok(Self {
            client: ApiClient::new(base_url, token, AuthType::Bearer)?,
        })
    }

    pub fn from_client(client: ApiClient) -> Self {
        Self { client }
    }

    /// Upload the full result tree of one instance
    pub async fn add_instance_result(&self, run: &RunResult) -> Result<(), ApiError> {
        let path = format!(
            "/testresult/run/{}/instance/{}",
            run.run_id, run.instance_id
        );
        ApiClient::check(self.client.post(&path, run).await?).await?;
        Ok(())
    }

    pub async fn update_instance_status(&self, status: &RunStatusInfo) -> Result<(), ApiError> {
        ApiClient::check(self.client.post("/status", status).await?).await?;
        Ok(())
    }

    pub async fn update_case_status(&self, status: &CaseStatusUpdate) -> Result<(), ApiError> {
        let path = format!(
            "/runtime/run/{}/instance/{}/case/status",
            status.run_id, status.instance_id
        );
        ApiClient::check(self.client.post(&path, status).await?).await?;
        Ok(())
    }

    pub async fn update_suite_status(&self, status: &SuiteStatusUpdate) -> Result<(), ApiError> {
        let path = format!(
            "/runtime/run/{}/instance/{}/suite/status",
            status.run_id, status.instance_id
        );
        ApiClient::check(self.client.post(&path, status).await?).await?;
        Ok(())
    }
}
