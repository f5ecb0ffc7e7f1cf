//! Content source clients.
//!
//! Every external provider implements [`SourceClient`]: build the request,
//! normalize the payload. The shared HTTP behavior (cache, rate limit,
//! retry, breaker classification) lives in [`core::HttpSourceCore`].

pub mod core;
pub mod datagov;
pub mod geonames;
pub mod guardian;
pub mod opentripmap;
pub mod wikidata;
pub mod wikipedia;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use crate::config::ProviderSettings;
use crate::models::CandidateItem;
use crate::services::cancel::CancelToken;

pub use self::core::{Fetched, HttpSourceCore, SharedSourceInfra};

// ============================================================================
// Error surface
// ============================================================================

/// Tagged error surface for the acquisition core. The breaker uses the
/// variant, not the message, to decide what counts as a failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    /// Timeout, DNS, connection reset — no HTTP reply was received
    #[error("transport error: {0}")]
    Transport(String),

    /// Upstream 5xx reply
    #[error("upstream error {0}")]
    Upstream(u16),

    /// HTTP 429 from the provider; carries the Retry-After in seconds
    #[error("upstream rate limited, retry after {0}s")]
    RateLimitedUpstream(u64),

    /// HTTP 401/403; the client disables itself for the process lifetime
    #[error("authentication rejected: {0}")]
    AuthFailure(String),

    /// Any other 4xx reply; the request was wrong, the provider is healthy
    #[error("request rejected with status {0}")]
    Rejected(u16),

    /// The reply arrived but could not be decoded
    #[error("response parse error: {0}")]
    ParseFailure(String),

    /// Fail-fast result when a breaker is open
    #[error("circuit open for {0}")]
    CircuitOpen(String),

    /// The cost ledger vetoed the call
    #[error("budget exceeded")]
    BudgetExceeded,

    /// Zero sources produced anything and the cache was empty too
    #[error("no content sources available for this query")]
    NoSourcesAvailable,

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl SourceError {
    /// 5xx and transport problems indicate an unhealthy provider;
    /// 4xx, upstream throttling and cancellation do not.
    pub fn trips_breaker(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Upstream(_) | Self::ParseFailure(_))
    }

    /// Aborted is not failed: leave breaker counters untouched.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Upstream(_) | Self::RateLimitedUpstream(_))
    }
}

// ============================================================================
// Descriptors
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTier {
    Free,
    Freemium,
    Premium,
}

impl SourceTier {
    pub fn parse_tier(s: &str) -> Self {
        match s {
            "freemium" => Self::Freemium,
            "premium" => Self::Premium,
            _ => Self::Free,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceCategory {
    Historical,
    Cultural,
    Tourism,
    Geographic,
    Academic,
    News,
    Government,
}

impl SourceCategory {
    pub fn parse_category(s: &str) -> Self {
        match s {
            "cultural" => Self::Cultural,
            "tourism" => Self::Tourism,
            "geographic" => Self::Geographic,
            "academic" => Self::Academic,
            "news" => Self::News,
            "government" => Self::Government,
            _ => Self::Historical,
        }
    }

    /// Authority class fed into quality scoring.
    pub fn authority_class(&self) -> &'static str {
        match self {
            Self::Government => "government",
            Self::Academic => "academic",
            Self::News => "major_news",
            Self::Tourism => "commercial",
            Self::Historical | Self::Cultural | Self::Geographic => "community",
        }
    }
}

/// How the API key travels, and under which name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
    None,
    HeaderKey { header: String },
    QueryKey { param: String },
    Bearer,
}

/// Process-lifetime constants for one provider.
#[derive(Debug, Clone)]
pub struct SourceDescriptor {
    pub name: String,
    pub base_url: String,
    pub tier: SourceTier,
    pub category: SourceCategory,
    pub rate_limit: u32,
    pub rate_period_secs: u64,
    pub cost_per_request: f64,
    pub cache_ttl_secs: u64,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub auth: AuthMode,
}

impl SourceDescriptor {
    /// Build from configuration; the auth param/header name is supplied by
    /// the concrete client, which knows its provider's convention.
    pub fn from_settings(settings: &ProviderSettings, auth: AuthMode) -> Self {
        Self {
            name: settings.name.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            tier: SourceTier::parse_tier(&settings.tier),
            category: SourceCategory::parse_category(&settings.category),
            rate_limit: settings.rate_limit,
            rate_period_secs: settings.rate_period,
            cost_per_request: settings.cost_per_request,
            cache_ttl_secs: settings.cache_ttl,
            timeout_secs: settings.timeout,
            max_retries: settings.max_retries,
            auth,
        }
    }
}

// ============================================================================
// Client contract
// ============================================================================

#[derive(Clone)]
pub struct SearchOptions {
    /// Cap on items the transform keeps
    pub limit: usize,
    pub location_hint: Option<String>,
    pub owner: Option<i64>,
    /// Request kind label for cost accounting
    pub kind: String,
    pub cancel: CancelToken,
}

impl SearchOptions {
    pub fn basic(limit: usize) -> Self {
        Self {
            limit,
            location_hint: None,
            owner: None,
            kind: "base".to_string(),
            cancel: CancelToken::never(),
        }
    }
}

/// Result of one source call after transformation.
#[derive(Debug, Clone)]
pub struct SourceResponse {
    pub source: String,
    pub items: Vec<CandidateItem>,
    pub cached: bool,
    pub cost: f64,
    pub latency_ms: u64,
}

/// Uniform contract over one external content API.
#[async_trait]
pub trait SourceClient: Send + Sync {
    fn descriptor(&self) -> &SourceDescriptor;

    /// Fetch and normalize. Implementations build provider params and call
    /// through their [`HttpSourceCore`]; all retry/cache/limit behavior is
    /// inherited unchanged.
    async fn search(&self, query: &str, opts: &SearchOptions)
    -> Result<SourceResponse, SourceError>;

    /// Normalize a raw payload into candidate items.
    fn transform(&self, raw: &serde_json::Value, opts: &SearchOptions) -> Vec<CandidateItem>;

    /// Per-client counters for the stats surface.
    fn stats(&self) -> SourceStats;
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceStats {
    pub name: String,
    pub tier: SourceTier,
    pub category: SourceCategory,
    pub requests: u64,
    pub errors: u64,
    pub total_cost: f64,
}

// ============================================================================
// Registry
// ============================================================================

/// All enabled clients, registered explicitly at startup.
/// Configuration, not reflection, decides membership.
pub struct SourceRegistry {
    clients: Vec<Arc<dyn SourceClient>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self { clients: Vec::new() }
    }

    pub fn register(&mut self, client: Arc<dyn SourceClient>) {
        tracing::info!("Registered content source: {}", client.descriptor().name);
        self.clients.push(client);
    }

    pub fn all(&self) -> &[Arc<dyn SourceClient>] {
        &self.clients
    }

    pub fn by_tier(&self, tier: SourceTier) -> Vec<Arc<dyn SourceClient>> {
        self.clients
            .iter()
            .filter(|c| c.descriptor().tier == tier)
            .cloned()
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SourceClient>> {
        self.clients.iter().find(|c| c.descriptor().name == name).cloned()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn stats(&self) -> Vec<SourceStats> {
        self.clients.iter().map(|c| c.stats()).collect()
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the registry from configuration. A provider whose key env var is
/// configured but unset is skipped with a warning; startup never fails for
/// a missing key.
pub fn build_registry(
    providers: &[ProviderSettings],
    infra: &SharedSourceInfra,
) -> SourceRegistry {
    let mut registry = SourceRegistry::new();

    for settings in providers {
        if !settings.enabled {
            tracing::info!("Content source '{}' disabled by configuration", settings.name);
            continue;
        }

        let key = resolve_key(settings);
        if !settings.key_env.is_empty() && key.is_none() {
            tracing::warn!(
                "Content source '{}' disabled: env var {} is not set",
                settings.name,
                settings.key_env
            );
            continue;
        }

        let client: Option<Arc<dyn SourceClient>> = match settings.name.as_str() {
            "wikipedia" => Some(Arc::new(wikipedia::WikipediaClient::new(settings, infra))),
            "wikidata" => Some(Arc::new(wikidata::WikidataClient::new(settings, infra))),
            "geonames" => Some(Arc::new(geonames::GeoNamesClient::new(settings, key, infra))),
            "opentripmap" => {
                Some(Arc::new(opentripmap::OpenTripMapClient::new(settings, key, infra)))
            },
            "guardian" => Some(Arc::new(guardian::GuardianClient::new(settings, key, infra))),
            "datagov" => Some(Arc::new(datagov::DataGovClient::new(settings, infra))),
            other => {
                tracing::warn!("Unknown content source '{}' in configuration, skipped", other);
                None
            },
        };

        if let Some(client) = client {
            registry.register(client);
        }
    }

    registry
}

fn resolve_key(settings: &ProviderSettings) -> Option<String> {
    if settings.key_env.is_empty() {
        return None;
    }
    std::env::var(&settings.key_env).ok().filter(|v| !v.is_empty())
}
