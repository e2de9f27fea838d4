// Reporter configuration
//
// Built once at startup: defaults, then the optional TOML file, then the
// process environment. The resulting value is immutable.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::client::AuthType;
use crate::utils::generate_id;

pub const CONFIG_FILE_NAME: &str = ".testpulserc.toml";

pub const ENV_AGENT: &str = "CB_AGENT";
pub const ENV_RUN_ID: &str = "CB_RUN_ID";
pub const ENV_INSTANCE_ID: &str = "CB_INSTANCE_ID";
pub const ENV_AGENT_ID: &str = "CB_AGENT_ID";
pub const ENV_ACCOUNT_ID: &str = "CB_ACCOUNT_ID";
pub const ENV_USER_ID: &str = "CB_USER_ID";
pub const ENV_LOCATION_ID: &str = "CB_LOCATION_ID";
pub const ENV_MONITOR_URL: &str = "CB_TEST_MONITOR_URL";
pub const ENV_MONITOR_TOKEN: &str = "CB_TEST_MONITOR_TOKEN";
pub const ENV_REPORT_SERVER_PORT: &str = "CB_REPORT_SERVER_PORT";
pub const ENV_OUTPUT_DIR: &str = "CB_OUTPUT_DIR";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(&'static str),

    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },

    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Contents of `.testpulserc.toml`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub collector: CollectorFileConfig,

    #[serde(default)]
    pub channel: ChannelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OutputConfig {
    /// Directory receiving the result file
    #[serde(default)]
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CollectorFileConfig {
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub token: Option<String>,

    #[serde(default)]
    pub auth: AuthType,
}

/// Local reporting channel settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Channel is disabled without a port
    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,

    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    #[serde(default = "default_reconnect_delay_max_ms")]
    pub reconnect_delay_max_ms: u64,

    /// How long to wait for an acknowledgement before dropping the connection
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            port: None,
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            reconnect_delay_max_ms: default_reconnect_delay_max_ms(),
            ack_timeout_ms: default_ack_timeout_ms(),
        }
    }
}

fn default_reconnect_attempts() -> u32 {
    10
}

fn default_reconnect_delay_ms() -> u64 {
    500
}

fn default_reconnect_delay_max_ms() -> u64 {
    5000
}

fn default_ack_timeout_ms() -> u64 {
    5000
}

impl FileConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Option<Self>, ConfigError> {
        // 1. .testpulserc.toml (current directory)
        // 2. ~/.testpulserc.toml (home directory)
        let mut paths = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd.join(CONFIG_FILE_NAME));
        }
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(CONFIG_FILE_NAME));
        }

        for path in &paths {
            if path.exists() {
                return Self::load_from_file(path).map(Some);
            }
        }

        Ok(None)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Generate default configuration as TOML
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

/// Identity stamped on every result and status payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunIdentity {
    pub run_id: String,
    pub instance_id: String,
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,
}

impl RunIdentity {
    /// Fresh identifiers for an unmanaged run
    pub fn local() -> Self {
        Self {
            run_id: generate_id(),
            instance_id: generate_id(),
            agent_id: generate_id(),
            account_id: None,
            user_id: None,
            location_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectorSettings {
    pub url: String,
    pub token: String,
    pub auth: AuthType,
}

/// Effective configuration of one reporter instance
#[derive(Debug, Clone, Serialize)]
pub struct ReporterConfig {
    /// Running under an execution agent
    pub managed: bool,
    pub identity: RunIdentity,
    pub output_dir: Option<PathBuf>,
    /// Remote reporting is disabled when absent
    pub collector: Option<CollectorSettings>,
    pub channel: ChannelConfig,
}

impl ReporterConfig {
    /// Read the config file (explicit path or default locations) and the environment
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match config_file {
            Some(path) => FileConfig::load_from_file(path)?,
            None => FileConfig::load()?.unwrap_or_default(),
        };
        Self::from_env(file)
    }

    pub fn from_env(file: FileConfig) -> Result<Self, ConfigError> {
        Self::from_lookup(file, |name| std::env::var(name).ok())
    }

    /// Overlay environment values, as returned by `lookup`, on a file config
    pub fn from_lookup(
        file: FileConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let managed = var(ENV_AGENT).is_some_and(|v| v.eq_ignore_ascii_case("true"));

        let required = |name: &'static str| -> Result<String, ConfigError> {
            match var(name) {
                Some(value) => Ok(value),
                None if managed => Err(ConfigError::MissingRequired(name)),
                None => Ok(generate_id()),
            }
        };

        let identity = RunIdentity {
            run_id: required(ENV_RUN_ID)?,
            instance_id: required(ENV_INSTANCE_ID)?,
            agent_id: required(ENV_AGENT_ID)?,
            account_id: parse_var(ENV_ACCOUNT_ID, var(ENV_ACCOUNT_ID))?,
            user_id: parse_var(ENV_USER_ID, var(ENV_USER_ID))?,
            location_id: var(ENV_LOCATION_ID),
        };

        let url = var(ENV_MONITOR_URL).or(file.collector.url);
        let token = var(ENV_MONITOR_TOKEN).or(file.collector.token);
        let collector = match (url, token) {
            (Some(url), Some(token)) => Some(CollectorSettings {
                url,
                token,
                auth: file.collector.auth,
            }),
            _ => None,
        };

        let mut channel = file.channel;
        if let Some(port) = parse_var::<u16>(ENV_REPORT_SERVER_PORT, var(ENV_REPORT_SERVER_PORT))? {
            channel.port = Some(port);
        }

        let output_dir = var(ENV_OUTPUT_DIR)
            .or(file.output.dir)
            .map(PathBuf::from);

        Ok(Self {
            managed,
            identity,
            output_dir,
            collector,
            channel,
        })
    }

    /// Copy safe to print: the collector token is masked
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if let Some(collector) = copy.collector.as_mut() {
            collector.token = "***".to_string();
        }
        copy
    }
}

fn parse_var<T: std::str::FromStr>(
    name: &'static str,
    value: Option<String>,
) -> Result<Option<T>, ConfigError> {
    value
        .map(|v| {
            v.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
                name,
                value: v.clone(),
            })
        })
        .transpose()
}
