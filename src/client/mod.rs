// Client module - HTTP access to the remote collector

pub mod base;
pub mod error;
pub mod results;
pub mod runs;
pub mod runtime;

pub use base::{ApiClient, AuthType};
pub use error::ApiError;
pub use results::{CaseTags, PollPolicy, ResultApi};
pub use runs::{RemoteRunStatus, RunOptions, RunsApi};
pub use runtime::RuntimeApi;

pub const DEFAULT_API_BASE_URL: &str = "https://api.cloudbeat.io";
