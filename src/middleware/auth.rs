use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::models::UserTier;
use crate::services::UserRepository;
use crate::utils::{ApiError, JwtUtil};

#[derive(Clone)]
pub struct AuthState {
    pub jwt_util: Arc<JwtUtil>,
    pub users: Arc<UserRepository>,
}

/// Authenticated caller, injected into request extensions for handlers
/// and the quota middleware.
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: i64,
    pub username: String,
    pub tier: UserTier,
}

/// Bearer-token authentication middleware.
/// 1. Verify the JWT
/// 2. Load the user (tier comes from the user record)
/// 3. Inject `AuthUser` into request extensions
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let uri = req.uri().path().to_string();
    let method = req.method().to_string();

    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Missing authorization header for {} {}", method, uri);
            ApiError::unauthorized("Missing authorization header")
        })?;

    let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        tracing::warn!("Invalid authorization header format for {} {}", method, uri);
        ApiError::unauthorized("Invalid authorization header format")
    })?;

    let claims = state.jwt_util.verify_token(token).map_err(|err| {
        tracing::warn!("JWT verification failed for {} {}", method, uri);
        err
    })?;

    let user_id = claims.sub.parse::<i64>().unwrap_or_default();

    let user = state
        .users
        .get_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Unknown user"))?;

    if !user.is_active {
        return Err(ApiError::forbidden("Account is deactivated"));
    }

    tracing::debug!(
        "Authenticated user {} (tier {}) on {} {}",
        user.username,
        user.tier,
        method,
        uri
    );

    let auth_user =
        AuthUser { user_id: user.id, username: user.username.clone(), tier: user.tier_enum() };
    req.extensions_mut().insert(auth_user);

    Ok(next.run(req).await)
}
