// Shared HTTP plumbing for the collector APIs

use rand::Rng;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::ApiError;

/// How requests are authenticated. Fixed per client instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    /// `Authorization: Bearer <token>`
    #[default]
    Bearer,
    /// `apiKey=<token>` query parameter
    ApiKey,
}

/// Response body wrapper used by every collector endpoint
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub data: Option<T>,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    token: String,
    auth: AuthType,
}

impl ApiClient {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        auth: AuthType,
    ) -> Result<Self, ApiError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Url::parse(&base_url)?;
        Ok(Self {
            http: Client::new(),
            base_url,
            token: token.into(),
            auth,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn auth_type(&self) -> AuthType {
        self.auth
    }

    /// Full request URL, with the api key and cache-busting parameters applied
    pub fn url(&self, method: &Method, path: &str) -> Result<Url, ApiError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, path))?;
        if self.auth == AuthType::ApiKey {
            let mut query = url.query_pairs_mut();
            query.append_pair("apiKey", &self.token);
            if *method == Method::GET {
                let rnd: u64 = rand::thread_rng().gen_range(0..1_000_000_000_000);
                query.append_pair("rnd", &rnd.to_string());
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let url = self.url(&method, path)?;
        debug!("REQ: {} {}", method, path);
        let mut req = self
            .http
            .request(method, url)
            .header("content-type", "application/json");
        if self.auth == AuthType::Bearer {
            req = req.bearer_auth(&self.token);
        }
        Ok(req)
    }

    /// Send a GET request. Non-success statuses are returned as-is.
    pub async fn get(&self, path: &str) -> Result<Response, ApiError> {
        let response = self.request(Method::GET, path)?.send().await?;
        debug!("RES: HTTP {}", response.status());
        Ok(response)
    }

    /// Send a POST request with a JSON body. Non-success statuses are returned as-is.
    pub async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<Response, ApiError> {
        let response = self.request(Method::POST, path)?.json(body).send().await?;
        debug!("RES: HTTP {}", response.status());
        Ok(response)
    }

    /// Turn non-success statuses into [`ApiError::Status`]
    pub async fn check(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// Decode the `data` member of a success response, if present
    pub(crate) async fn data<T: DeserializeOwned>(response: Response) -> Result<Option<T>, ApiError> {
        let bytes = response.bytes().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        let envelope: Envelope<T> = serde_json::from_slice(&bytes)?;
        Ok(envelope.data)
    }
}
