use axum::{
    Router,
    middleware as axum_middleware,
    routing::{delete, get, post},
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use atlascast::config::Config;
use atlascast::db;
use atlascast::middleware::{AuthState, QuotaState};
use atlascast::models;
use atlascast::services::jobs::{JobRepository, JobWatchdog};
use atlascast::services::{
    BreakerRegistry, CacheService, CostLedger, DeepResearchService, JobController, Orchestrator,
    PreferenceAdapter, SharedSourceInfra, UserRepository, build_registry,
};
use atlascast::utils::JwtUtil;
use atlascast::{AppState, handlers, middleware};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::auth::register,
        handlers::auth::login,
        handlers::auth::get_me,

        handlers::podcast::generate,
        handlers::podcast::status,
        handlers::podcast::get_podcast,
        handlers::podcast::list_podcasts,
        handlers::podcast::delete_podcast,
        handlers::podcast::cancel_podcast,
        handlers::podcast::regenerate,
    ),
    components(
        schemas(
            models::RegisterRequest,
            models::LoginRequest,
            models::LoginResponse,
            models::UserResponse,
            models::UserTier,
            models::GenerateRequest,
            models::GenerationPreferences,
            models::GenerationStatusResponse,
            models::PodcastResponse,
            models::PodcastListItem,
            models::PodcastListResponse,
            models::JobStatus,
            models::RequestKind,
        )
    ),
    tags(
        (name = "Authentication", description = "User authentication endpoints"),
        (name = "Podcasts", description = "Podcast generation and library endpoints"),
    ),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.as_mut().unwrap();
        components.add_security_scheme(
            "bearer_auth",
            utoipa::openapi::security::SecurityScheme::Http(utoipa::openapi::security::Http::new(
                utoipa::openapi::security::HttpAuthScheme::Bearer,
            )),
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let config = Config::load()?;

    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    // Keep the appender guard alive for the lifetime of main
    let mut _log_guard = None;
    if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("atlascast.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        _log_guard = Some(guard);
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Atlascast starting up");
    tracing::info!("Configuration loaded successfully");

    let pool = db::create_pool(&config.database.url).await?;
    tracing::info!("Database pool created and migrations applied");

    let jwt_util = Arc::new(JwtUtil::new(&config.auth.jwt_secret, &config.auth.jwt_expires_in));
    let users = Arc::new(UserRepository::new(pool.clone()));

    // Shared acquisition infrastructure: one cache, one ledger, one
    // breaker registry for the whole process
    let cache = Arc::new(CacheService::in_memory());
    let ledger = Arc::new(CostLedger::new());
    let breakers = Arc::new(BreakerRegistry::new());
    let infra = SharedSourceInfra {
        cache: Arc::clone(&cache),
        ledger: Arc::clone(&ledger),
        breakers: Arc::clone(&breakers),
    };

    let sources = Arc::new(build_registry(&config.providers, &infra));
    tracing::info!("{} content source(s) registered", sources.len());

    let adapter = Arc::new(PreferenceAdapter::new(pool.clone()));
    let research = Arc::new(DeepResearchService::new(&config.research, Arc::clone(&ledger)));

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&sources),
        Arc::clone(&ledger),
        Arc::clone(&adapter),
        Arc::clone(&research),
        config.budgets.clone(),
    ));

    let job_deadline = Duration::from_secs(config.jobs.deadline_secs);
    let jobs = Arc::new(JobController::new(
        JobRepository::new(pool.clone()),
        Arc::clone(&orchestrator),
        job_deadline,
    ));

    if config.jobs.watchdog_enabled {
        let interval = Duration::from_secs(config.jobs.watchdog_interval_secs);
        tracing::info!("Starting job watchdog with interval: {}s", interval.as_secs());
        let watchdog = JobWatchdog::new(JobRepository::new(pool.clone()), job_deadline, interval);
        tokio::spawn(watchdog.run());
    } else {
        tracing::warn!("Job watchdog disabled by configuration");
    }

    let app_state = Arc::new(AppState {
        db: pool.clone(),
        jwt_util: Arc::clone(&jwt_util),
        users: Arc::clone(&users),
        jobs: Arc::clone(&jobs),
        orchestrator: Arc::clone(&orchestrator),
        sources: Arc::clone(&sources),
        breakers: Arc::clone(&breakers),
        ledger: Arc::clone(&ledger),
    });

    let auth_state = AuthState { jwt_util: Arc::clone(&jwt_util), users: Arc::clone(&users) };
    let quota_state = Arc::new(QuotaState::new(config.quota.clone()));

    let public_routes = Router::new()
        .route("/api/auth/register", post(handlers::auth::register))
        .route("/api/auth/login", post(handlers::auth::login))
        .with_state(Arc::clone(&app_state));

    let protected_routes = Router::new()
        .route("/api/auth/me", get(handlers::auth::get_me))
        .route("/api/podcasts/generate", post(handlers::podcast::generate))
        .route("/api/podcasts/status/:job_id", get(handlers::podcast::status))
        .route("/api/podcasts", get(handlers::podcast::list_podcasts))
        .route("/api/podcasts/:id", get(handlers::podcast::get_podcast))
        .route("/api/podcasts/:id", delete(handlers::podcast::delete_podcast))
        .route("/api/podcasts/:id/cancel", post(handlers::podcast::cancel_podcast))
        .route("/api/podcasts/:id/regenerate", post(handlers::podcast::regenerate))
        .route("/api/sources/stats", get(handlers::sources::get_stats))
        .with_state(Arc::clone(&app_state))
        .layer(axum_middleware::from_fn_with_state(
            Arc::clone(&quota_state),
            middleware::quota_middleware,
        ))
        .layer(axum_middleware::from_fn_with_state(auth_state, middleware::auth_middleware));

    let health_routes = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check));

    let app = Router::new()
        .merge(SwaggerUi::new("/api-docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public_routes)
        .merge(protected_routes)
        .merge(health_routes)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("API documentation available at http://{}/api-docs", addr);
    tracing::info!("Atlascast is ready to serve requests");

    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn ready_check() -> &'static str {
    "READY"
}
