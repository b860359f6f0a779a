// Remote fetcher: downloads a payload over HTTP with per-attempt timeouts,
// exponential backoff between attempts and a skip list of status codes that
// must not be retried.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::Client;
use reqwest::header::HeaderMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::error::{AttemptError, FetchError};
use crate::hooks::{ProgressSink, UrlResolver};
use crate::{FetchConfig, RetryPolicy};

// Cap on the buffer reserved up front from a Content-Length header
const MAX_PREALLOC: u64 = 16 * 1024 * 1024;

/// Create a reqwest Client with the provided configuration
pub fn create_client(config: &FetchConfig) -> Result<Client, FetchError> {
    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(5) // Allow multiple connections to same host
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    client_builder.build().map_err(FetchError::from)
}

#[derive(Debug, Clone)]
pub struct RemoteFetcher {
    http_client: Client,
}

impl RemoteFetcher {
    pub fn new(http_client: Client) -> Self {
        Self { http_client }
    }

    pub fn from_config(config: &FetchConfig) -> Result<Self, FetchError> {
        Ok(Self::new(create_client(config)?))
    }

    /// Fetches `url` with retry logic.
    ///
    /// The resolver, if any, runs once before the first attempt. Statuses in
    /// the policy's skip list fail immediately; every other failure is retried
    /// until `retry_limit` retries have been spent. Cancelling `cancel` aborts
    /// the in-flight attempt or the pending backoff sleep.
    pub async fn fetch(
        &self,
        url: &str,
        headers: &HeaderMap,
        policy: &RetryPolicy,
        progress: Option<&dyn ProgressSink>,
        resolver: Option<&dyn UrlResolver>,
        cancel: &CancellationToken,
    ) -> Result<Bytes, FetchError> {
        let effective_url = match resolver {
            Some(resolver) => {
                let resolved = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                    resolved = resolver.resolve(url) => resolved,
                };
                let resolved = resolved.map_err(|e| {
                    warn!(url, error = %e, "URL resolver failed");
                    FetchError::Resolution(e.to_string())
                })?;
                debug!(url, resolved = %resolved, "Resolved request URL");
                resolved
            }
            None => url.to_owned(),
        };

        let target = Url::parse(&effective_url)
            .map_err(|e| FetchError::InvalidUrl(format!("{effective_url}: {e}")))?;

        retry_with_backoff(&target, policy, cancel, || {
            self.attempt(&target, headers, policy.timeout_per_attempt, progress)
        })
        .await
    }

    /// One attempt, body included, bounded by `timeout` (zero disables the bound)
    async fn attempt(
        &self,
        url: &Url,
        headers: &HeaderMap,
        timeout: Duration,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<Bytes, AttemptError> {
        if timeout.is_zero() {
            return self.download(url, headers, progress).await;
        }

        match tokio::time::timeout(timeout, self.download(url, headers, progress)).await {
            Ok(result) => result,
            Err(_) => Err(AttemptError::Timeout(timeout)),
        }
    }

    async fn download(
        &self,
        url: &Url,
        headers: &HeaderMap,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<Bytes, AttemptError> {
        let response = self
            .http_client
            .get(url.clone())
            .headers(headers.clone())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptError::Status(status));
        }

        let total = response.content_length();
        let mut body = BytesMut::with_capacity(total.unwrap_or(0).min(MAX_PREALLOC) as usize);
        let mut received: u64 = 0;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            received += chunk.len() as u64;
            body.extend_from_slice(&chunk);
            if let Some(sink) = progress {
                sink.on_progress(received, total);
            }
        }

        Ok(body.freeze())
    }
}

/// Drive `attempt` until it succeeds, hits a skipped status, runs out of
/// retries or `cancel` fires. Waits `policy.delay_for(n)` before retry `n`.
async fn retry_with_backoff<F, Fut>(
    target: &Url,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut attempt: F,
) -> Result<Bytes, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Bytes, AttemptError>>,
{
    let mut retries = 0;
    loop {
        let attempt_no = retries + 1;
        debug!(url = %target, attempt = attempt_no, "Starting fetch attempt");

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            outcome = attempt() => outcome,
        };

        let error = match outcome {
            Ok(data) => {
                debug!(url = %target, attempt = attempt_no, size = data.len(), "Fetch succeeded");
                return Ok(data);
            }
            Err(AttemptError::Status(status)) if policy.skips(status.as_u16()) => {
                warn!(url = %target, %status, "Status code is in skip list, not retrying");
                return Err(FetchError::NonRetryableStatus {
                    status,
                    url: target.to_string(),
                });
            }
            Err(e) => e,
        };

        if retries >= policy.retry_limit {
            warn!(
                url = %target,
                attempts = attempt_no,
                error = %error,
                "Max retries exceeded"
            );
            return Err(FetchError::RetriesExhausted {
                attempts: attempt_no,
                last_error: error.to_string(),
            });
        }

        let delay = policy.delay_for(retries);
        warn!(
            url = %target,
            attempt = attempt_no,
            ?delay,
            error = %error,
            "Fetch attempt failed, retrying"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        retries += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HookError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> RemoteFetcher {
        RemoteFetcher::from_config(&FetchConfig::default()).unwrap()
    }

    fn fast_policy(retry_limit: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_retry_limit(retry_limit)
            .with_initial_delay(Duration::from_millis(10))
            .with_backoff_factor(2.0)
            .with_timeout(Duration::from_secs(5))
    }

    async fn request_count(server: &MockServer) -> usize {
        server.received_requests().await.unwrap().len()
    }

    async fn fetch(
        server: &MockServer,
        policy: &RetryPolicy,
    ) -> Result<Bytes, FetchError> {
        fetcher()
            .fetch(
                &format!("{}/img.png", server.uri()),
                &HeaderMap::new(),
                policy,
                None,
                None,
                &CancellationToken::new(),
            )
            .await
    }

    struct FixedResolver {
        target: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl UrlResolver for FixedResolver {
        async fn resolve(&self, _url: &str) -> Result<String, HookError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.target.clone())
        }
    }

    struct FailingResolver;

    #[async_trait]
    impl UrlResolver for FailingResolver {
        async fn resolve(&self, url: &str) -> Result<String, HookError> {
            Err(format!("no mirror for {url}").into())
        }
    }

    #[tokio::test]
    async fn test_success_reports_progress() {
        let server = MockServer::start().await;
        let payload = vec![7u8; 4096];
        Mock::given(method("GET"))
            .and(path("/img.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.clone()))
            .mount(&server)
            .await;

        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let reports = reports.clone();
            move |received: u64, total: Option<u64>| reports.lock().push((received, total))
        };

        let data = fetcher()
            .fetch(
                &format!("{}/img.png", server.uri()),
                &HeaderMap::new(),
                &fast_policy(0),
                Some(&sink),
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(data.as_ref(), payload.as_slice());
        let reports = reports.lock();
        assert!(!reports.is_empty());
        assert_eq!(reports.last().unwrap().0, 4096);
        assert!(reports.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .mount(&server)
            .await;

        let policy = RetryPolicy::default()
            .with_retry_limit(5)
            .with_initial_delay(Duration::from_millis(50))
            .with_backoff_factor(2.0);

        let started = Instant::now();
        let data = fetch(&server, &policy).await.unwrap();

        assert_eq!(data.as_ref(), b"ok");
        assert_eq!(request_count(&server).await, 3);
        // 50ms before the first retry, 100ms before the second
        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_follows_geometric_schedule() {
        let target = Url::parse("https://example.com/img.png").unwrap();
        let policy = RetryPolicy::default()
            .with_retry_limit(3)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_factor(2.0);

        let started = tokio::time::Instant::now();
        let mut calls = Vec::new();
        let err = retry_with_backoff(&target, &policy, &CancellationToken::new(), || {
            calls.push(started.elapsed());
            async { Err(AttemptError::Status(reqwest::StatusCode::SERVICE_UNAVAILABLE)) }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, FetchError::RetriesExhausted { attempts: 4, .. }));
        assert_eq!(
            calls,
            vec![
                Duration::ZERO,
                Duration::from_millis(100),
                Duration::from_millis(300),
                Duration::from_millis(700),
            ]
        );
    }

    #[tokio::test]
    async fn test_no_progress_after_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![1u8; 2048])
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;

        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let reports = reports.clone();
            move |received: u64, total: Option<u64>| reports.lock().push((received, total))
        };

        let policy = fast_policy(1).with_timeout(Duration::from_millis(50));
        let err = fetcher()
            .fetch(
                &format!("{}/img.png", server.uri()),
                &HeaderMap::new(),
                &policy,
                Some(&sink),
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::RetriesExhausted { attempts: 2, .. }));

        // Both delayed responses are due by now; abandoned attempts must stay silent
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(reports.lock().is_empty());
    }

    #[tokio::test]
    async fn test_skip_status_fails_after_one_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let policy = fast_policy(5).with_skip_status_codes([404]);
        let err = fetch(&server, &policy).await.unwrap_err();

        assert!(matches!(err, FetchError::NonRetryableStatus { .. }));
        assert_eq!(err.status().map(|s| s.as_u16()), Some(404));
        assert_eq!(request_count(&server).await, 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted_after_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = fetch(&server, &fast_policy(3)).await.unwrap_err();

        match err {
            FetchError::RetriesExhausted { attempts, last_error } => {
                assert_eq!(attempts, 4);
                assert!(last_error.contains("503"));
            }
            other => panic!("Expected RetriesExhausted, got {other:?}"),
        }
        assert_eq!(request_count(&server).await, 4);
    }

    #[tokio::test]
    async fn test_zero_retry_limit_means_single_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = fetch(&server, &fast_policy(0)).await.unwrap_err();
        assert!(matches!(err, FetchError::RetriesExhausted { attempts: 1, .. }));
        assert_eq!(request_count(&server).await, 1);
    }

    #[tokio::test]
    async fn test_slow_response_times_out_and_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"late".to_vec())
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let policy = fast_policy(1).with_timeout(Duration::from_millis(50));
        let err = fetch(&server, &policy).await.unwrap_err();

        match err {
            FetchError::RetriesExhausted { attempts, last_error } => {
                assert_eq!(attempts, 2);
                assert!(last_error.contains("timed out"));
            }
            other => panic!("Expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resolver_runs_once_across_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/mirror.png"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/mirror.png"))
            .and(header("x-token", "abc"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mirrored".to_vec()))
            .mount(&server)
            .await;

        let resolver = FixedResolver {
            target: format!("{}/mirror.png", server.uri()),
            calls: AtomicUsize::new(0),
        };
        let mut headers = HeaderMap::new();
        headers.insert("x-token", "abc".parse().unwrap());

        let data = fetcher()
            .fetch(
                "logical://images/a",
                &headers,
                &fast_policy(3),
                None,
                Some(&resolver),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(data.as_ref(), b"mirrored");
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
        assert_eq!(request_count(&server).await, 2);
    }

    #[tokio::test]
    async fn test_resolver_failure_is_not_retried() {
        let server = MockServer::start().await;

        let err = fetcher()
            .fetch(
                &server.uri(),
                &HeaderMap::new(),
                &fast_policy(3),
                None,
                Some(&FailingResolver),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Resolution(msg) if msg.contains("no mirror")));
        assert_eq!(request_count(&server).await, 0);
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let err = fetcher()
            .fetch(
                "not a url",
                &HeaderMap::new(),
                &fast_policy(3),
                None,
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_stops_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let policy = fast_policy(5).with_initial_delay(Duration::from_secs(30));
        let cancel = CancellationToken::new();
        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                cancel.cancel();
            });
        }

        let started = Instant::now();
        let err = fetcher()
            .fetch(
                &format!("{}/img.png", server.uri()),
                &HeaderMap::new(),
                &policy,
                None,
                None,
                &cancel,
            )
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(request_count(&server).await, 1);
    }
}
