//! Per-tier request quota: a fixed one-minute window per user.
//! Exceeding it answers 429 with a Retry-After header.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::QuotaConfig;
use crate::middleware::auth::AuthUser;
use crate::models::UserTier;
use crate::utils::ApiError;

struct Window {
    started: Instant,
    count: u32,
}

pub struct QuotaState {
    config: QuotaConfig,
    windows: DashMap<i64, Window>,
}

impl QuotaState {
    pub fn new(config: QuotaConfig) -> Self {
        Self { config, windows: DashMap::new() }
    }

    fn limit_for(&self, tier: UserTier) -> u32 {
        match tier {
            UserTier::Free => self.config.free,
            UserTier::Premium => self.config.premium,
            UserTier::Enterprise => self.config.enterprise,
        }
    }

    /// Count one request; Err carries the seconds until the window resets.
    pub fn admit(&self, user_id: i64, tier: UserTier) -> Result<(), u64> {
        let window_len = Duration::from_secs(self.config.window_secs);
        let limit = self.limit_for(tier);
        let now = Instant::now();

        let mut window = self
            .windows
            .entry(user_id)
            .or_insert_with(|| Window { started: now, count: 0 });

        if now.duration_since(window.started) >= window_len {
            window.started = now;
            window.count = 0;
        }

        if window.count >= limit {
            let elapsed = now.duration_since(window.started);
            let retry_after = window_len.saturating_sub(elapsed).as_secs().max(1);
            return Err(retry_after);
        }

        window.count += 1;
        Ok(())
    }
}

pub async fn quota_middleware(
    State(state): State<Arc<QuotaState>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    // Runs inside the auth layer; an absent AuthUser is a wiring bug
    let Some(user) = req.extensions().get::<AuthUser>().cloned() else {
        tracing::error!("Quota middleware reached without an authenticated user");
        return Err(ApiError::internal("Request context missing"));
    };

    if let Err(retry_after) = state.admit(user.user_id, user.tier) {
        tracing::warn!(
            "Quota exceeded for user {} (tier {})",
            user.user_id,
            user.tier.as_str()
        );
        return Err(ApiError::too_many_requests("Request quota exceeded", retry_after));
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quota() -> QuotaState {
        QuotaState::new(QuotaConfig { window_secs: 60, free: 2, premium: 5, enterprise: 10 })
    }

    #[tokio::test]
    async fn free_tier_hits_its_limit() {
        let state = quota();
        assert!(state.admit(1, UserTier::Free).is_ok());
        assert!(state.admit(1, UserTier::Free).is_ok());
        let retry_after = state.admit(1, UserTier::Free).unwrap_err();
        assert!(retry_after >= 1 && retry_after <= 60);
    }

    #[tokio::test]
    async fn tiers_and_users_are_independent() {
        let state = quota();
        for _ in 0..2 {
            state.admit(1, UserTier::Free).unwrap();
        }
        assert!(state.admit(1, UserTier::Free).is_err());
        // Another user is unaffected
        assert!(state.admit(2, UserTier::Free).is_ok());
        // Premium has headroom
        for _ in 0..5 {
            state.admit(3, UserTier::Premium).unwrap();
        }
        assert!(state.admit(3, UserTier::Premium).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn window_resets() {
        let state = quota();
        state.admit(1, UserTier::Free).unwrap();
        state.admit(1, UserTier::Free).unwrap();
        assert!(state.admit(1, UserTier::Free).is_err());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(state.admit(1, UserTier::Free).is_ok());
    }
}
