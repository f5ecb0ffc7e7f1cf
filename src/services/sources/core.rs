//! Shared HTTP behavior for all source clients: cache lookup, rate-limit
//! acquire, request with per-provider timeout, classified retries, cache
//! write, and per-request cost/latency accounting.
//!
//! Cache reads bypass the rate limiter and are served even when the
//! breaker is open; only live calls go through the breaker.

use sha2::{Digest, Sha256};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::services::cache::CacheService;
use crate::services::circuit_breaker::{BreakerRegistry, CircuitBreaker};
use crate::services::cost_ledger::CostLedger;
use crate::services::rate_limiter::TokenBucket;

use super::{AuthMode, SearchOptions, SourceDescriptor, SourceError, SourceStats};

/// Shared infrastructure handed to every client at registration.
#[derive(Clone)]
pub struct SharedSourceInfra {
    pub cache: Arc<CacheService>,
    pub ledger: Arc<CostLedger>,
    pub breakers: Arc<BreakerRegistry>,
}

/// One fetched payload with its request-level metadata.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub value: serde_json::Value,
    pub cached: bool,
    pub cost: f64,
    pub latency_ms: u64,
}

pub struct HttpSourceCore {
    descriptor: SourceDescriptor,
    key: Option<String>,
    http: reqwest::Client,
    bucket: TokenBucket,
    breaker: Arc<CircuitBreaker>,
    cache: Arc<CacheService>,
    ledger: Arc<CostLedger>,
    /// Set on 401/403; stays set for the process lifetime
    disabled: AtomicBool,
    requests: AtomicU64,
    errors: AtomicU64,
    accumulated_cost: Mutex<f64>,
}

impl HttpSourceCore {
    pub fn new(descriptor: SourceDescriptor, key: Option<String>, infra: &SharedSourceInfra) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(concat!("atlascast/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(descriptor.timeout_secs))
            .build()
            .unwrap_or_default();

        let bucket = TokenBucket::new(
            descriptor.rate_limit,
            Duration::from_secs(descriptor.rate_period_secs),
        );
        let breaker = infra.breakers.get_or_create(&descriptor.name);

        Self {
            descriptor,
            key,
            http,
            bucket,
            breaker,
            cache: Arc::clone(&infra.cache),
            ledger: Arc::clone(&infra.ledger),
            disabled: AtomicBool::new(false),
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            accumulated_cost: Mutex::new(0.0),
        }
    }

    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn total_cost(&self) -> f64 {
        self.accumulated_cost.lock().map(|c| *c).unwrap_or(0.0)
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            name: self.descriptor.name.clone(),
            tier: self.descriptor.tier,
            category: self.descriptor.category,
            requests: self.request_count(),
            errors: self.error_count(),
            total_cost: self.total_cost(),
        }
    }

    /// GET `endpoint` with `params`, going cache → breaker → rate limit →
    /// HTTP with retries. Auth material is injected at send time and never
    /// becomes part of the cache key.
    pub async fn fetch_json(
        &self,
        endpoint: &str,
        params: &[(String, String)],
        opts: &SearchOptions,
    ) -> Result<Fetched, SourceError> {
        if self.disabled.load(Ordering::Relaxed) {
            return Err(SourceError::AuthFailure(format!(
                "{} disabled after credential rejection",
                self.descriptor.name
            )));
        }
        if opts.cancel.is_cancelled() {
            return Err(SourceError::Cancelled);
        }

        let cache_key = self.cache_key(endpoint, params);
        if let Some(value) = self.cache.get(&cache_key).await {
            tracing::debug!("Cache hit for {}", self.descriptor.name);
            return Ok(Fetched { value, cached: true, cost: 0.0, latency_ms: 0 });
        }

        let result = self
            .breaker
            .call(|| self.fetch_live(endpoint, params, &cache_key, opts))
            .await;

        if let Err(SourceError::AuthFailure(_)) = &result {
            self.disabled.store(true, Ordering::Relaxed);
            tracing::warn!(
                "Content source '{}' disabled for the process lifetime (auth rejected)",
                self.descriptor.name
            );
        }

        result
    }

    async fn fetch_live(
        &self,
        endpoint: &str,
        params: &[(String, String)],
        cache_key: &str,
        opts: &SearchOptions,
    ) -> Result<Fetched, SourceError> {
        let started = std::time::Instant::now();
        let mut attempt: u32 = 0;

        loop {
            tokio::select! {
                _ = opts.cancel.cancelled() => return Err(SourceError::Cancelled),
                _ = self.bucket.acquire() => {},
            }

            self.requests.fetch_add(1, Ordering::Relaxed);

            match self.send_once(endpoint, params).await {
                Ok(value) => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    let cost = self.descriptor.cost_per_request;
                    self.record_cost(cost, opts, true);
                    self.cache
                        .set(
                            cache_key,
                            value.clone(),
                            Duration::from_secs(self.descriptor.cache_ttl_secs),
                        )
                        .await;

                    tracing::debug!(
                        "Source request ok: {} endpoint={} latency_ms={}",
                        self.descriptor.name,
                        endpoint,
                        latency_ms
                    );
                    return Ok(Fetched { value, cached: false, cost, latency_ms });
                },
                Err(err) => {
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    if reply_received(&err) {
                        // Paid even though the upstream errored
                        self.record_cost(self.descriptor.cost_per_request, opts, false);
                    }

                    if err.is_retryable() && attempt < self.descriptor.max_retries {
                        let backoff = retry_backoff(&err, attempt);
                        tracing::debug!(
                            "Source request retrying: {} attempt={} backoff={:?} ({})",
                            self.descriptor.name,
                            attempt + 1,
                            backoff,
                            err
                        );
                        tokio::select! {
                            _ = opts.cancel.cancelled() => return Err(SourceError::Cancelled),
                            _ = tokio::time::sleep(backoff) => {},
                        }
                        attempt += 1;
                        continue;
                    }

                    tracing::warn!(
                        "Source request failed: {} endpoint={} error={}",
                        self.descriptor.name,
                        endpoint,
                        err
                    );
                    return Err(err);
                },
            }
        }
    }

    async fn send_once(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<serde_json::Value, SourceError> {
        let url = if endpoint.is_empty() {
            self.descriptor.base_url.clone()
        } else {
            format!("{}/{}", self.descriptor.base_url, endpoint.trim_start_matches('/'))
        };

        let mut query: Vec<(String, String)> = params.to_vec();
        let mut request = self.http.get(&url);

        match &self.descriptor.auth {
            AuthMode::None => {},
            AuthMode::QueryKey { param } => {
                if let Some(key) = &self.key {
                    query.push((param.clone(), key.clone()));
                }
            },
            AuthMode::HeaderKey { header } => {
                if let Some(key) = &self.key {
                    request = request.header(header.as_str(), key);
                }
            },
            AuthMode::Bearer => {
                if let Some(key) = &self.key {
                    request = request.bearer_auth(key);
                }
            },
        }

        let response = request.query(&query).send().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::Transport(format!("timeout after {}s", self.descriptor.timeout_secs))
            } else {
                SourceError::Transport(e.to_string())
            }
        })?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(SourceError::RateLimitedUpstream(retry_after));
        }

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(SourceError::AuthFailure(format!("HTTP {}", status.as_u16())));
        }

        if status.is_server_error() {
            return Err(SourceError::Upstream(status.as_u16()));
        }

        if !status.is_success() {
            return Err(SourceError::Rejected(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("json") {
            response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| SourceError::ParseFailure(e.to_string()))
        } else {
            // XML and plain text are kept verbatim; the transform decides
            response
                .text()
                .await
                .map(serde_json::Value::String)
                .map_err(|e| SourceError::ParseFailure(e.to_string()))
        }
    }

    fn record_cost(&self, amount: f64, opts: &SearchOptions, success: bool) {
        if let Ok(mut cost) = self.accumulated_cost.lock() {
            *cost += amount;
        }
        self.ledger
            .track(&self.descriptor.name, amount, opts.owner, &opts.kind, success);
    }

    /// Cache key over provider, endpoint and sorted params. Auth material
    /// is excluded by construction.
    fn cache_key(&self, endpoint: &str, params: &[(String, String)]) -> String {
        let mut sorted: Vec<&(String, String)> = params.iter().collect();
        sorted.sort();

        let mut hasher = Sha256::new();
        hasher.update(self.descriptor.name.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(endpoint.as_bytes());
        for (k, v) in sorted {
            hasher.update(b"\x1f");
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
        }
        let digest = hasher.finalize();
        digest[..16].iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// Did an HTTP reply come back? Costs accrue only when it did.
fn reply_received(err: &SourceError) -> bool {
    matches!(
        err,
        SourceError::Upstream(_)
            | SourceError::RateLimitedUpstream(_)
            | SourceError::AuthFailure(_)
            | SourceError::Rejected(_)
            | SourceError::ParseFailure(_)
    )
}

fn retry_backoff(err: &SourceError, attempt: u32) -> Duration {
    match err {
        // Honor Retry-After, within reason
        SourceError::RateLimitedUpstream(secs) => Duration::from_secs((*secs).min(30)),
        // Exponential: 2s, 4s, 8s, capped at 10s
        _ => Duration::from_secs((2u64 << attempt).min(10)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderSettings;
    use crate::services::sources::{SourceCategory, SourceTier};

    fn test_infra() -> SharedSourceInfra {
        SharedSourceInfra {
            cache: Arc::new(CacheService::in_memory()),
            ledger: Arc::new(CostLedger::new()),
            breakers: Arc::new(BreakerRegistry::new()),
        }
    }

    fn test_descriptor(base_url: &str, max_retries: u32) -> SourceDescriptor {
        let settings = ProviderSettings {
            name: "testsource".to_string(),
            base_url: base_url.to_string(),
            rate_limit: 1000,
            rate_period: 1,
            cost_per_request: 0.01,
            max_retries,
            ..Default::default()
        };
        SourceDescriptor::from_settings(&settings, AuthMode::None)
    }

    #[tokio::test]
    async fn parses_json_and_caches_second_call() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/search")
            .match_query(mockito::Matcher::UrlEncoded("q".into(), "paris".into()))
            .with_header("content-type", "application/json")
            .with_body(r#"{"items": [1, 2, 3]}"#)
            .expect(1)
            .create_async()
            .await;

        let infra = test_infra();
        let core = HttpSourceCore::new(test_descriptor(&server.url(), 0), None, &infra);
        let params = vec![("q".to_string(), "paris".to_string())];
        let opts = SearchOptions::basic(10);

        let first = core.fetch_json("search", &params, &opts).await.unwrap();
        assert!(!first.cached);
        assert_eq!(first.value["items"][0], 1);

        let second = core.fetch_json("search", &params, &opts).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.cost, 0.0);

        mock.assert_async().await;
        // One live call tracked, once
        assert!((infra.ledger.total_cost() - 0.01).abs() < 1e-9);
    }

    #[tokio::test]
    async fn five_server_errors_open_the_breaker() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/search")
            .with_status(500)
            .expect(5)
            .create_async()
            .await;

        let infra = test_infra();
        let core = HttpSourceCore::new(test_descriptor(&server.url(), 0), None, &infra);
        let opts = SearchOptions::basic(10);

        for _ in 0..5 {
            let err = core.fetch_json("search", &[], &opts).await.unwrap_err();
            assert!(matches!(err, SourceError::Upstream(500)));
        }

        // Sixth dispatch fails fast without touching the network
        let err = core.fetch_json("search", &[], &opts).await.unwrap_err();
        assert!(matches!(err, SourceError::CircuitOpen(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn auth_rejection_disables_client() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/search")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;

        let infra = test_infra();
        let core = HttpSourceCore::new(test_descriptor(&server.url(), 3), None, &infra);
        let opts = SearchOptions::basic(10);

        let err = core.fetch_json("search", &[], &opts).await.unwrap_err();
        assert!(matches!(err, SourceError::AuthFailure(_)));

        // No further network traffic from this client
        let err = core.fetch_json("search", &[], &opts).await.unwrap_err();
        assert!(matches!(err, SourceError::AuthFailure(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn not_found_is_rejected_not_transport() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/missing")
            .with_status(404)
            .create_async()
            .await;

        let infra = test_infra();
        let core = HttpSourceCore::new(test_descriptor(&server.url(), 3), None, &infra);
        let opts = SearchOptions::basic(10);

        let err = core.fetch_json("missing", &[], &opts).await.unwrap_err();
        assert!(matches!(err, SourceError::Rejected(404)));
        assert!(!err.trips_breaker());
    }

    #[tokio::test]
    async fn cancelled_before_dispatch() {
        let infra = test_infra();
        let core = HttpSourceCore::new(test_descriptor("http://127.0.0.1:9", 0), None, &infra);

        let (handle, token) = crate::services::cancel::CancelToken::new_pair();
        handle.cancel();
        let mut opts = SearchOptions::basic(10);
        opts.cancel = token;

        let err = core.fetch_json("search", &[], &opts).await.unwrap_err();
        assert!(matches!(err, SourceError::Cancelled));
        // Aborted calls never reach the ledger
        assert_eq!(infra.ledger.total_cost(), 0.0);
    }
}
