pub mod cache;
pub mod cancel;
pub mod circuit_breaker;
pub mod cost_ledger;
pub mod jobs;
pub mod orchestrator;
pub mod preference;
pub mod quality;
pub mod question;
pub mod rate_limiter;
pub mod research;
pub mod sources;
pub mod standout;
pub mod users;

pub use cache::{CacheService, CacheStore, MemoryCache};
pub use cancel::{CancelHandle, CancelToken};
pub use circuit_breaker::{BreakerRegistry, CircuitBreaker, CircuitState};
pub use cost_ledger::{BudgetDecision, CostLedger};
pub use jobs::{JobController, JobRepository, JobWatchdog};
pub use orchestrator::{GatherRequest, NoopProgress, Orchestrator, ProgressSink, StrategyKind};
pub use preference::{PreferenceAdapter, PreferenceRepository};
pub use quality::QualityAssessor;
pub use question::QuestionDetector;
pub use rate_limiter::TokenBucket;
pub use research::DeepResearchService;
pub use sources::{
    SearchOptions, SharedSourceInfra, SourceClient, SourceError, SourceRegistry, build_registry,
};
pub use standout::StandoutScorer;
pub use users::UserRepository;
