use std::hash::{Hash, Hasher};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::RetryPolicy;
use crate::cache::{CacheRule, identifier_for};
use crate::hooks::LoadHooks;

/// Everything needed to load one resource
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub url: String,
    /// Per-request headers, applied over the client defaults
    pub headers: HeaderMap,
    pub retry: RetryPolicy,
    /// Disk caching is enabled when a rule is present
    pub cache_rule: Option<CacheRule>,
    /// Replaces the URL as the input of the cache identifier
    pub cache_key: Option<String>,
    pub hooks: LoadHooks,
}

impl LoadRequest {
    /// Request with default retry settings and disk caching enabled in the default namespace
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HeaderMap::new(),
            retry: RetryPolicy::default(),
            cache_rule: Some(CacheRule::default()),
            cache_key: None,
            hooks: LoadHooks::default(),
        }
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.as_ref().parse::<reqwest::header::HeaderName>(),
            HeaderValue::from_str(value.as_ref()),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cache_rule(mut self, rule: CacheRule) -> Self {
        self.cache_rule = Some(rule);
        self
    }

    pub fn without_disk_cache(mut self) -> Self {
        self.cache_rule = None;
        self
    }

    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn with_hooks(mut self, hooks: LoadHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Disk cache identifier of this request
    pub fn identifier(&self) -> String {
        identifier_for(self.cache_key.as_deref().unwrap_or(&self.url))
    }

    pub fn key(&self) -> RequestKey {
        RequestKey::from(self)
    }
}

/// Value identity of a [`LoadRequest`]: URL, cache key, retry parameters and
/// cache rule. Headers and hooks do not take part.
#[derive(Debug, Clone)]
pub struct RequestKey {
    pub url: String,
    pub cache_key: Option<String>,
    pub retry_limit: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub timeout_per_attempt: Duration,
    pub skip_status_codes: Vec<u16>,
    pub cache_rule: Option<CacheRule>,
}

impl From<&LoadRequest> for RequestKey {
    fn from(request: &LoadRequest) -> Self {
        let mut skip_status_codes = request.retry.skip_status_codes.clone();
        skip_status_codes.sort_unstable();
        skip_status_codes.dedup();

        Self {
            url: request.url.clone(),
            cache_key: request.cache_key.clone(),
            retry_limit: request.retry.retry_limit,
            initial_delay: request.retry.initial_delay,
            backoff_factor: request.retry.backoff_factor,
            timeout_per_attempt: request.retry.timeout_per_attempt,
            skip_status_codes,
            cache_rule: request.cache_rule.clone(),
        }
    }
}

impl PartialEq for RequestKey {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
            && self.cache_key == other.cache_key
            && self.retry_limit == other.retry_limit
            && self.initial_delay == other.initial_delay
            && self.backoff_factor.to_bits() == other.backoff_factor.to_bits()
            && self.timeout_per_attempt == other.timeout_per_attempt
            && self.skip_status_codes == other.skip_status_codes
            && self.cache_rule == other.cache_rule
    }
}

impl Eq for RequestKey {}

impl Hash for RequestKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.hash(state);
        self.cache_key.hash(state);
        self.retry_limit.hash(state);
        self.initial_delay.hash(state);
        self.backoff_factor.to_bits().hash(state);
        self.timeout_per_attempt.hash(state);
        self.skip_status_codes.hash(state);
        self.cache_rule.hash(state);
    }
}
