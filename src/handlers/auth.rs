//! Authentication endpoints: register, login, current user.

use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use std::sync::Arc;
use validator::Validate;

use crate::AppState;
use crate::middleware::AuthUser;
use crate::models::{LoginRequest, LoginResponse, RegisterRequest, UserResponse};
use crate::utils::{ApiError, ApiResult};

/// Register a new user
#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User created", body = UserResponse),
        (status = 400, description = "Validation failed"),
        (status = 409, description = "Username taken")
    ),
    tag = "Authentication"
)]
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()
        .map_err(|e| ApiError::bad_request(format!("Invalid registration: {}", e)))?;

    if state.users.get_by_username(&req.username).await?.is_some() {
        return Err(ApiError::conflict("Username is already taken"));
    }

    let password_hash = bcrypt::hash(&req.password, bcrypt::DEFAULT_COST)
        .map_err(|e| ApiError::internal(format!("Password hashing failed: {}", e)))?;

    let user = state
        .users
        .create(&req.username, &password_hash, req.email.as_deref())
        .await?;

    tracing::info!("Registered user {} (id {})", user.username, user.id);
    Ok((StatusCode::CREATED, Json(UserResponse::from(&user))))
}

/// Log in and receive a bearer token
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated", body = LoginResponse),
        (status = 401, description = "Bad credentials")
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = state
        .users
        .get_by_username(&req.username)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid username or password"))?;

    let verified = bcrypt::verify(&req.password, &user.password_hash).unwrap_or(false);
    if !verified {
        return Err(ApiError::unauthorized("Invalid username or password"));
    }
    if !user.is_active {
        return Err(ApiError::forbidden("Account is deactivated"));
    }

    let token = state.jwt_util.issue_token(user.id, &user.username)?;

    tracing::info!("User {} logged in", user.username);
    Ok(Json(LoginResponse { token, user: UserResponse::from(&user) }))
}

/// Current authenticated user
#[utoipa::path(
    get,
    path = "/api/auth/me",
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer_auth" = [])),
    tag = "Authentication"
)]
pub async fn get_me(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    let user = state
        .users
        .get_by_id(auth.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(UserResponse::from(&user)))
}
