//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default number of pipeline workers.
pub const DEFAULT_WORKER_COUNT: usize = 8;

/// Well-known queue the conversion service consumes.
pub const DEFAULT_REQUEST_QUEUE: &str = "rpc_queue";

/// Default broker address.
pub const DEFAULT_AMQP_URL: &str = "amqp://localhost:5672/";

/// Default reply deadline in seconds.
pub const DEFAULT_REPLY_TIMEOUT_SECS: u64 = 30;

/// Default Markdown output file for the server.
pub const DEFAULT_OUTPUT_PATH: &str = "GMDoutput.md";

/// Tokenization pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of concurrent classification workers.
    pub worker_count: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
        }
    }
}

impl PipelineConfig {
    /// Read from `LATEX2GMD_WORKERS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let worker_count = parse_var(&lookup, "LATEX2GMD_WORKERS")?.unwrap_or(DEFAULT_WORKER_COUNT);
        if worker_count == 0 {
            return Err(ConfigError::InvalidValue {
                key: "LATEX2GMD_WORKERS".to_string(),
                message: "must be a positive integer".to_string(),
            });
        }
        Ok(Self { worker_count })
    }
}

/// RPC client configuration.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Broker URL. May embed credentials.
    pub amqp_url: SecretString,
    /// Queue the request is published to.
    pub request_queue: String,
    /// How long to wait for the correlated reply. `None` waits forever.
    pub reply_timeout: Option<Duration>,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            amqp_url: SecretString::from(DEFAULT_AMQP_URL),
            request_queue: DEFAULT_REQUEST_QUEUE.to_string(),
            reply_timeout: Some(Duration::from_secs(DEFAULT_REPLY_TIMEOUT_SECS)),
        }
    }
}

impl RpcConfig {
    /// Read from `LATEX2GMD_AMQP_URL`, `LATEX2GMD_REQUEST_QUEUE` and
    /// `LATEX2GMD_RPC_TIMEOUT_SECS` (0 disables the deadline).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let amqp_url = lookup("LATEX2GMD_AMQP_URL").unwrap_or_else(|| DEFAULT_AMQP_URL.to_string());

        let request_queue = lookup("LATEX2GMD_REQUEST_QUEUE")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_REQUEST_QUEUE.to_string());

        let timeout_secs: u64 =
            parse_var(&lookup, "LATEX2GMD_RPC_TIMEOUT_SECS")?.unwrap_or(DEFAULT_REPLY_TIMEOUT_SECS);
        let reply_timeout = (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs));

        Ok(Self {
            amqp_url: SecretString::from(amqp_url),
            request_queue,
            reply_timeout,
        })
    }
}

/// Conversion server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Where rendered Markdown is written.
    pub output_path: PathBuf,
    /// Stop after this many replies. `None` serves until cancelled.
    pub max_requests: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
            max_requests: Some(1),
        }
    }
}

impl ServerConfig {
    /// Read from `LATEX2GMD_OUTPUT` and `LATEX2GMD_SERVER_MAX_REQUESTS`
    /// (0 means unlimited).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let output_path = lookup("LATEX2GMD_OUTPUT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_PATH));

        let max_requests: usize = parse_var(&lookup, "LATEX2GMD_SERVER_MAX_REQUESTS")?.unwrap_or(1);

        Ok(Self {
            output_path,
            max_requests: (max_requests > 0).then_some(max_requests),
        })
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            }),
    }
}
