use std::path::PathBuf;
use std::time::Duration as StdDuration;

use tracing::warn;

pub const ENV_API_BASE_URL: &str = "COURSEHUB_API_BASE_URL";
pub const ENV_API_TOKEN: &str = "COURSEHUB_API_TOKEN";
pub const ENV_HTTP_TIMEOUT_SECS: &str = "COURSEHUB_HTTP_TIMEOUT_SECS";
pub const ENV_SUBMISSION_CONCURRENCY: &str = "COURSEHUB_SUBMISSION_CONCURRENCY";
pub const ENV_LOG_DIR: &str = "COURSEHUB_LOG_DIR";

const DEFAULT_API_BASE_URL: &str = "http://localhost:5000/api";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SUBMISSION_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub api_token: Option<String>,
    /// Applies to GET requests only; grade writes are never timed out.
    pub read_timeout: StdDuration,
    pub submission_concurrency: usize,
    pub log_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_token: None,
            read_timeout: StdDuration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            submission_concurrency: DEFAULT_SUBMISSION_CONCURRENCY,
            log_dir: None,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let api_base_url = lookup(ENV_API_BASE_URL)
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or(defaults.api_base_url);

        let api_token = lookup(ENV_API_TOKEN)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let read_timeout = parse_number::<u64>(&lookup, ENV_HTTP_TIMEOUT_SECS)
            .filter(|secs| *secs > 0)
            .map(StdDuration::from_secs)
            .unwrap_or(defaults.read_timeout);

        let submission_concurrency =
            parse_number::<usize>(&lookup, ENV_SUBMISSION_CONCURRENCY)
                .unwrap_or(defaults.submission_concurrency)
                .max(1);

        let log_dir = lookup(ENV_LOG_DIR)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);

        Self {
            api_base_url,
            api_token,
            read_timeout,
            submission_concurrency,
            log_dir,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.api_base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }
}

fn parse_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(target: "app::config", key, value = %raw, "ignoring invalid numeric setting");
            None
        }
    }
}
