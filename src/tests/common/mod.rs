// Common test utilities: in-memory database, seeded users, mock sources.

use async_trait::async_trait;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::config::{BudgetsConfig, ProviderSettings, ResearchConfig};
use crate::models::CandidateItem;
use crate::services::cost_ledger::CostLedger;
use crate::services::orchestrator::Orchestrator;
use crate::services::preference::PreferenceAdapter;
use crate::services::research::DeepResearchService;
use crate::services::sources::{
    AuthMode, SearchOptions, SourceClient, SourceDescriptor, SourceError, SourceRegistry,
    SourceResponse, SourceStats,
};

/// Create an in-memory SQLite database for testing
pub async fn create_test_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(3))
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create test database");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

/// Insert a user and return its id
pub async fn create_test_user(pool: &SqlitePool, username: &str, tier: &str) -> i64 {
    sqlx::query(
        "INSERT INTO users (username, password_hash, email, tier, is_active) \
         VALUES (?, ?, ?, ?, TRUE)",
    )
    .bind(username)
    .bind("$2b$12$hashed_password")
    .bind(format!("{}@test.com", username))
    .bind(tier)
    .execute(pool)
    .await
    .expect("Failed to create test user");

    let (id,): (i64,) = sqlx::query_as("SELECT id FROM users WHERE username = ?")
        .bind(username)
        .fetch_one(pool)
        .await
        .expect("Failed to fetch test user");
    id
}

pub fn mock_item(title: &str, source: &str, description: &str) -> CandidateItem {
    CandidateItem {
        fingerprint: CandidateItem::compute_fingerprint(title, source, None),
        title: title.to_string(),
        description: Some(description.to_string()),
        source_name: source.to_string(),
        source_authority: "community".to_string(),
        media: Vec::new(),
        url: Some(format!("https://example.org/{}", title.replace(' ', "-"))),
        date: None,
        location: None,
        topics: Vec::new(),
        raw: serde_json::Value::Null,
    }
}

pub enum MockBehavior {
    Items(Vec<CandidateItem>),
    Fail(SourceError),
    Slow(Duration, Vec<CandidateItem>),
}

/// Scripted source client for orchestrator and controller tests.
pub struct MockSource {
    descriptor: SourceDescriptor,
    behavior: MockBehavior,
    calls: AtomicU32,
}

impl MockSource {
    pub fn new(name: &str, tier: &str, cost: f64, behavior: MockBehavior) -> Self {
        let settings = ProviderSettings {
            name: name.to_string(),
            base_url: format!("https://{}.invalid", name),
            tier: tier.to_string(),
            cost_per_request: cost,
            ..Default::default()
        };
        Self {
            descriptor: SourceDescriptor::from_settings(&settings, AuthMode::None),
            behavior,
            calls: AtomicU32::new(0),
        }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SourceClient for MockSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn search(
        &self,
        _query: &str,
        opts: &SearchOptions,
    ) -> Result<SourceResponse, SourceError> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        match &self.behavior {
            MockBehavior::Items(items) => Ok(SourceResponse {
                source: self.descriptor.name.clone(),
                items: items.clone(),
                cached: false,
                cost: self.descriptor.cost_per_request,
                latency_ms: 5,
            }),
            MockBehavior::Fail(err) => Err(err.clone()),
            MockBehavior::Slow(delay, items) => {
                tokio::select! {
                    _ = opts.cancel.cancelled() => Err(SourceError::Cancelled),
                    _ = tokio::time::sleep(*delay) => Ok(SourceResponse {
                        source: self.descriptor.name.clone(),
                        items: items.clone(),
                        cached: false,
                        cost: self.descriptor.cost_per_request,
                        latency_ms: delay.as_millis() as u64,
                    }),
                }
            },
        }
    }

    fn transform(&self, _raw: &serde_json::Value, _opts: &SearchOptions) -> Vec<CandidateItem> {
        Vec::new()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            name: self.descriptor.name.clone(),
            tier: self.descriptor.tier,
            category: self.descriptor.category,
            requests: self.call_count() as u64,
            errors: 0,
            total_cost: 0.0,
        }
    }
}

/// Orchestrator over the given clients, with research disabled and the
/// default tier budgets.
pub fn build_orchestrator(
    pool: &SqlitePool,
    clients: Vec<Arc<dyn SourceClient>>,
    ledger: Arc<CostLedger>,
) -> Arc<Orchestrator> {
    let mut registry = SourceRegistry::new();
    for client in clients {
        registry.register(client);
    }

    let research_config = ResearchConfig {
        key_env: "ATLAS_TEST_RESEARCH_KEY_UNSET".to_string(),
        ..Default::default()
    };
    let research = Arc::new(DeepResearchService::new(&research_config, Arc::clone(&ledger)));
    let adapter = Arc::new(PreferenceAdapter::new(pool.clone()));

    Arc::new(Orchestrator::new(
        Arc::new(registry),
        ledger,
        adapter,
        research,
        BudgetsConfig::default(),
    ))
}
