//! Observability surface for the acquisition core: per-source counters,
//! breaker states, and the spend ledger.

use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;
use crate::services::circuit_breaker::BreakerSnapshot;
use crate::services::cost_ledger::LedgerSummary;
use crate::services::sources::SourceStats;
use crate::utils::ApiResult;

#[derive(Serialize)]
pub struct SourcesStatsResponse {
    pub sources: Vec<SourceStats>,
    pub breakers: Vec<BreakerSnapshot>,
    pub ledger: LedgerSummary,
}

/// GET /api/sources/stats
pub async fn get_stats(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(SourcesStatsResponse {
        sources: state.sources.stats(),
        breakers: state.breakers.snapshots().await,
        ledger: state.ledger.summary(),
    }))
}
