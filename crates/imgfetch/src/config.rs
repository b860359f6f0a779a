use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Directory name used under the system temp dir when no cache path is configured
pub const DEFAULT_CACHE_DIR_NAME: &str = "imgfetch-cache";

/// Client-level options shared by every load issued through one loader
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Base directory of the disk cache. Falls back to the system temp dir.
    pub cache_dir: Option<PathBuf>,

    /// Capacity in bytes of the optional in-memory layer (0 disables it)
    pub memory_cache_size: u64,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Whether to follow redirects
    pub follow_redirects: bool,

    /// User agent string
    pub user_agent: String,

    /// Headers sent with every request, overridden by per-request headers
    pub headers: HeaderMap,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            memory_cache_size: 0,
            connect_timeout: Duration::from_secs(10),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: FetchConfig::get_default_headers(),
        }
    }
}

impl FetchConfig {
    pub fn builder() -> crate::builder::FetchConfigBuilder {
        crate::builder::FetchConfigBuilder::new()
    }

    /// Resolved disk cache base directory
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_CACHE_DIR_NAME))
    }

    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("image/avif,image/webp,image/apng,image/*,*/*;q=0.8"),
        );

        default_headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );
        default_headers
    }
}

/// Retry behaviour of a single fetch
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    pub retry_limit: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each retry. Values <= 1 keep it constant.
    pub backoff_factor: f64,
    /// Upper bound on one attempt, body included
    pub timeout_per_attempt: Duration,
    /// Status codes that fail the fetch immediately
    pub skip_status_codes: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_limit: 5,
            initial_delay: Duration::from_millis(500),
            backoff_factor: 1.5,
            timeout_per_attempt: Duration::from_secs(5),
            skip_status_codes: Vec::new(),
        }
    }
}

impl RetryPolicy {
    /// A policy that gives up after the first attempt
    pub fn no_retry() -> Self {
        Self {
            retry_limit: 0,
            ..Self::default()
        }
    }

    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_per_attempt = timeout;
        self
    }

    pub fn with_skip_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.skip_status_codes = codes.into_iter().collect();
        self
    }

    /// Whether a response with this status ends the fetch without retry
    pub fn skips(&self, status: u16) -> bool {
        self.skip_status_codes.contains(&status)
    }

    /// Delay to wait before retry number `retry_index` (0-based).
    pub fn delay_for(&self, retry_index: u32) -> Duration {
        // NaN fails this comparison as well, so it also means "constant"
        if !(self.backoff_factor > 1.0) {
            return self.initial_delay;
        }
        let exp = i32::try_from(retry_index).unwrap_or(i32::MAX);
        let nanos = self.initial_delay.as_nanos() as f64 * self.backoff_factor.powi(exp);
        if nanos.is_finite() && nanos < u64::MAX as f64 {
            Duration::from_nanos(nanos as u64)
        } else {
            Duration::MAX
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.retry_limit, 5);
        assert_eq!(policy.initial_delay, Duration::from_millis(500));
        assert_eq!(policy.backoff_factor, 1.5);
        assert_eq!(policy.timeout_per_attempt, Duration::from_secs(5));
        assert!(policy.skip_status_codes.is_empty());
    }

    #[test]
    fn test_delay_grows_geometrically() {
        let policy = RetryPolicy::default()
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_factor(2.0);

        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_constant_for_small_factor() {
        for factor in [1.0, 0.5, 0.0, -3.0, f64::NAN] {
            let policy = RetryPolicy::default()
                .with_initial_delay(Duration::from_millis(250))
                .with_backoff_factor(factor);
            assert_eq!(policy.delay_for(0), Duration::from_millis(250));
            assert_eq!(policy.delay_for(7), Duration::from_millis(250));
        }
    }

    #[test]
    fn test_delay_saturates() {
        let policy = RetryPolicy::default().with_backoff_factor(10.0);
        assert_eq!(policy.delay_for(u32::MAX), Duration::MAX);
    }

    #[test]
    fn test_skip_status_codes() {
        let policy = RetryPolicy::default().with_skip_status_codes([404, 410]);
        assert!(policy.skips(404));
        assert!(!policy.skips(500));
    }

    #[test]
    fn test_cache_dir_fallback() {
        let config = FetchConfig::default();
        assert!(config.cache_dir().ends_with(DEFAULT_CACHE_DIR_NAME));
    }
}
