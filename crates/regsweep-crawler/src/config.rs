use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::prefixes::DEFAULT_ALPHABET;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlerConfig {
    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub request: RequestConfig,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    #[serde(default = "default_prefix_concurrency")]
    pub prefix_concurrency: usize,

    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    #[serde(default = "default_prefix_alphabet")]
    pub prefix_alphabet: String,

    #[serde(default = "default_prefix_length")]
    pub prefix_length: usize,

    /// Maximum number of prefixes processed by a single run
    #[serde(default)]
    pub limit: Option<usize>,

    #[serde(default = "default_on_search_error")]
    pub on_search_error: OnError,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            request: RequestConfig::default(),
            retry: RetryPolicy::default(),
            max_concurrent_requests: default_max_concurrent_requests(),
            prefix_concurrency: default_prefix_concurrency(),
            retention_days: default_retention_days(),
            prefix_alphabet: default_prefix_alphabet(),
            prefix_length: default_prefix_length(),
            limit: None,
            on_search_error: default_on_search_error(),
        }
    }
}

fn default_max_concurrent_requests() -> usize {
    8
}

fn default_prefix_concurrency() -> usize {
    1
}

fn default_retention_days() -> u32 {
    1
}

fn default_prefix_alphabet() -> String {
    String::from(DEFAULT_ALPHABET)
}

fn default_prefix_length() -> usize {
    3
}

fn default_on_search_error() -> OnError {
    OnError::SkipAndLog
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum OnError {
    Fail,
    SkipAndLog,
}

/// Upstream registry endpoints and search parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryConfig {
    #[serde(default = "default_jurisdiction")]
    pub jurisdiction: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_search_path")]
    pub search_path: String,

    #[serde(default = "default_detail_path")]
    pub detail_path: String,

    #[serde(default = "default_history_path")]
    pub history_path: String,

    #[serde(default = "default_entity_types")]
    pub entity_types: Vec<String>,

    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            jurisdiction: default_jurisdiction(),
            base_url: default_base_url(),
            search_path: default_search_path(),
            detail_path: default_detail_path(),
            history_path: default_history_path(),
            entity_types: default_entity_types(),
            page_size: default_page_size(),
        }
    }
}

impl RegistryConfig {
    pub fn search_url(&self) -> String {
        self.url(&self.search_path)
    }

    pub fn detail_url(&self) -> String {
        self.url(&self.detail_path)
    }

    pub fn history_url(&self) -> String {
        self.url(&self.history_path)
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

fn default_jurisdiction() -> String {
    String::from("NY")
}

fn default_base_url() -> String {
    String::from("https://apps.dos.ny.gov/PublicInquiryWeb/api/PublicInquiry")
}

fn default_search_path() -> String {
    String::from("GetComplexSearchMatchingEntities")
}

fn default_detail_path() -> String {
    String::from("GetEntityRecordByID")
}

fn default_history_path() -> String {
    String::from("GetNameHistoryByID")
}

fn default_entity_types() -> Vec<String> {
    [
        "Corporation",
        "LimitedLiabilityCompany",
        "LimitedPartnership",
        "LimitedLiabilityPartnership",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_page_size() -> u32 {
    50
}

/// Immutable request settings applied to every outbound call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_headers")]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub cookies: BTreeMap<String, String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            headers: default_headers(),
            cookies: BTreeMap::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl RequestConfig {
    /// Per-request timeout. Must be finite and strictly positive.
    pub fn timeout(&self) -> anyhow::Result<Duration> {
        let secs = self.timeout_secs;
        if !secs.is_finite() || secs <= 0.0 {
            anyhow::bail!("Request timeout must be a positive number of seconds, got {secs}");
        }
        Duration::try_from_secs_f64(secs)
            .map_err(|e| anyhow::anyhow!("Invalid request timeout {secs}: {e}"))
    }

    /// Parses a `name=value; name2=value2` cookie string into the cookie jar.
    pub fn with_cookie_string(mut self, cookies: &str) -> Self {
        for pair in cookies.split(';') {
            if let Some((name, value)) = pair.split_once('=') {
                let name = name.trim();
                if !name.is_empty() {
                    self.cookies.insert(name.to_string(), value.trim().to_string());
                }
            }
        }
        self
    }

    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        let header = self
            .cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        Some(header)
    }
}

fn default_user_agent() -> String {
    String::from(
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
         Chrome/138.0.0.0 Safari/537.36",
    )
}

fn default_headers() -> BTreeMap<String, String> {
    [
        ("Accept", "application/json, text/plain, */*"),
        ("Accept-Language", "en-US,en;q=0.9"),
        ("Content-Type", "application/json;charset=UTF-8"),
        ("Origin", "https://apps.dos.ny.gov"),
        ("Referer", "https://apps.dos.ny.gov/publicInquiry/"),
        ("Sec-Fetch-Dest", "empty"),
        ("Sec-Fetch-Mode", "cors"),
        ("Sec-Fetch-Site", "same-origin"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_timeout_secs() -> f64 {
    20.0
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total number of attempts for one request
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff_ms(),
            max_jitter_ms: default_max_jitter_ms(),
        }
    }
}

impl RetryPolicy {
    /// Delay slept after the given failed attempt (attempts start at 1).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(30);
        let base = self.base_backoff_ms.saturating_mul(1u64 << exp);
        let jitter = if self.max_jitter_ms > 0 {
            fastrand::u64(0..self.max_jitter_ms)
        } else {
            0
        };
        Duration::from_millis(base.saturating_add(jitter))
    }
}

fn default_max_retries() -> u32 {
    4
}

fn default_base_backoff_ms() -> u64 {
    500
}

fn default_max_jitter_ms() -> u64 {
    300
}
