// Result retrieval (api key authenticated)

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{ApiClient, ApiError, AuthType, DEFAULT_API_BASE_URL};

/// Attempt budget and backoff for result polling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub attempts: u32,
    pub initial_delay: Duration,
    /// Added to the delay after every attempt
    pub increment: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            initial_delay: Duration::from_millis(1000),
            increment: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseTags {
    pub case_id: String,
    pub fqn: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ResultApi {
    client: ApiClient,
    poll: PollPolicy,
}

impl ResultApi {
    /// `base_url` defaults to the public API host
    pub fn new(token: &str, base_url: Option<&str>) -> Result<Self, ApiError> {
        let base_url = base_url.unwrap_or(DEFAULT_API_BASE_URL);
        Ok(Self {
            client: ApiClient::new(base_url, token, AuthType::ApiKey)?,
            poll: PollPolicy::default(),
        })
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Long-poll the result of a run.
    ///
    /// `202 Accepted` means the result is not ready yet and polling continues
    /// with a growing delay. `404` and an exhausted attempt budget both yield
    /// `Ok(None)`; any other error status is returned as an error.
    pub async fn get_result_by_run_id(&self, run_id: &str) -> Result<Option<Value>, ApiError> {
        let path = format!("/results/run/{}", run_id);
        let mut delay = self.poll.initial_delay;

        for attempt in 1..=self.poll.attempts {
            match self.client.get(&path).await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    match status {
                        404 => return Ok(None),
                        202 => debug!("Result for run {} not ready (attempt {})", run_id, attempt),
                        _ => {
                            let response = ApiClient::check(response).await?;
                            if let Some(data) = ApiClient::data::<Value>(response).await? {
                                return Ok(Some(data));
                            }
                        }
                    }
                }
                Err(e) => warn!("Polling result for run {} failed: {}", run_id, e),
            }

            if attempt < self.poll.attempts {
                tokio::time::sleep(delay).await;
                delay += self.poll.increment;
            }
        }
        Ok(None)
    }

    pub async fn get_result_cases_tags(&self, run_id: &str) -> Result<Vec<CaseTags>, ApiError> {
        let path = format!("/results/run/{}/cases/tags", run_id);
        let response = ApiClient::check(self.client.get(&path).await?).await?;
        ApiClient::data(response)
            .await?
            .ok_or_else(|| ApiError::EmptyResponse("no data received".to_string()))
    }
}
