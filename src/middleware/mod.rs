pub mod auth;
pub mod quota;

pub use auth::{AuthState, AuthUser, auth_middleware};
pub use quota::{QuotaState, quota_middleware};
