//! Atlascast Library
//!
//! Content acquisition and ranking core for location/question podcast
//! generation, plus the job lifecycle and HTTP surface around it.

use sqlx::SqlitePool;
use std::sync::Arc;

pub mod config;
pub mod db;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use config::Config;
pub use services::{
    BreakerRegistry, CacheService, CostLedger, DeepResearchService, JobController, JobRepository,
    Orchestrator, PreferenceAdapter, SourceRegistry, UserRepository,
};
pub use utils::JwtUtil;

/// Application shared state
///
/// Rust's type system is the DI container: every service is constructed
/// once at startup and shared behind an Arc.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,

    pub jwt_util: Arc<JwtUtil>,
    pub users: Arc<UserRepository>,

    pub jobs: Arc<JobController>,
    pub orchestrator: Arc<Orchestrator>,

    pub sources: Arc<SourceRegistry>,
    pub breakers: Arc<BreakerRegistry>,
    pub ledger: Arc<CostLedger>,
}
