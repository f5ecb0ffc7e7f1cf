//! Per-source circuit breaker.
//!
//! Stops dispatching to a provider that keeps failing, probes it again
//! after a recovery window, and closes once it proves healthy.

use dashmap::DashMap;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::services::sources::SourceError;

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 2;
pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure: Option<Instant>,
}

pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    success_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_thresholds(
            name,
            DEFAULT_FAILURE_THRESHOLD,
            DEFAULT_SUCCESS_THRESHOLD,
            DEFAULT_RECOVERY_TIMEOUT,
        )
    }

    pub fn with_thresholds(
        name: impl Into<String>,
        failure_threshold: u32,
        success_threshold: u32,
        recovery_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            failure_threshold,
            success_threshold,
            recovery_timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_failure: None,
            }),
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    /// Run `f` under breaker protection.
    ///
    /// While the circuit is open and the recovery timer has not elapsed,
    /// fails immediately with `CircuitOpen` and does NOT invoke `f`.
    /// Errors classified as cancellation leave the counters untouched.
    pub async fn call<T, F, Fut>(&self, f: F) -> Result<T, SourceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        {
            let mut inner = self.inner.lock().await;
            if inner.state == CircuitState::Open {
                let elapsed_enough = inner
                    .last_failure
                    .map(|t| t.elapsed() >= self.recovery_timeout)
                    .unwrap_or(true);

                if elapsed_enough {
                    inner.state = CircuitState::HalfOpen;
                    inner.consecutive_successes = 0;
                    tracing::info!("Circuit breaker {}: open -> half_open", self.name);
                } else {
                    return Err(SourceError::CircuitOpen(self.name.clone()));
                }
            }
        }

        match f().await {
            Ok(value) => {
                self.on_success().await;
                Ok(value)
            },
            Err(err) => {
                if err.trips_breaker() {
                    self.on_failure().await;
                } else if !err.is_cancellation() {
                    // 4xx / upstream throttling: the provider answered,
                    // reset the failure streak
                    self.on_non_failure().await;
                }
                Err(err)
            },
        }
    }

    async fn on_success(&self) {
        let mut inner = self.inner.lock().await;
        inner.consecutive_failures = 0;

        if inner.state == CircuitState::HalfOpen {
            inner.consecutive_successes += 1;
            if inner.consecutive_successes >= self.success_threshold {
                inner.state = CircuitState::Closed;
                inner.consecutive_successes = 0;
                inner.last_failure = None;
                tracing::info!("Circuit breaker {}: half_open -> closed", self.name);
            }
        }
    }

    async fn on_non_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.consecutive_failures = 0;
    }

    async fn on_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.consecutive_failures += 1;
        inner.last_failure = Some(Instant::now());

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                tracing::warn!("Circuit breaker {}: half_open -> open (probe failed)", self.name);
            },
            CircuitState::Closed if inner.consecutive_failures >= self.failure_threshold => {
                inner.state = CircuitState::Open;
                tracing::error!(
                    "Circuit breaker {}: closed -> open after {} consecutive failures",
                    self.name,
                    inner.consecutive_failures
                );
            },
            _ => {},
        }
    }

    /// Manual reset to closed; counters go back to zero.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.last_failure = None;
        tracing::info!("Circuit breaker {}: manually reset to closed", self.name);
    }

    pub async fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().await;
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
}

/// Process-wide breaker registry, one breaker per source name.
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self { breakers: DashMap::new() }
    }

    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name)))
            .clone()
    }

    pub async fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset().await;
        }
    }

    pub async fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut out = Vec::with_capacity(self.breakers.len());
        for entry in self.breakers.iter() {
            out.push(entry.value().snapshot().await);
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
