//! JWT issuing and verification for the bearer-token API.

use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::utils::{ApiError, ApiResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id as a string
    pub sub: String,
    pub username: String,
    pub exp: i64,
    pub iat: i64,
}

pub struct JwtUtil {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expires_in: Duration,
}

impl JwtUtil {
    /// `expires_in` accepts "24h", "30m", "3600s" or a plain number of seconds.
    pub fn new(secret: &str, expires_in: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expires_in: parse_expiry(expires_in),
        }
    }

    pub fn issue_token(&self, user_id: i64, username: &str) -> ApiResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            username: username.to_string(),
            exp: (now + self.expires_in).timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| ApiError::internal(format!("Failed to issue token: {}", e)))
    }

    pub fn verify_token(&self, token: &str) -> ApiResult<Claims> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|_| ApiError::unauthorized("Invalid or expired token"))
    }
}

fn parse_expiry(input: &str) -> Duration {
    let fallback = Duration::hours(24);
    let s = input.trim().to_lowercase();

    if let Ok(secs) = s.parse::<i64>() {
        return Duration::seconds(secs);
    }

    let digits = s.chars().take_while(|c| c.is_ascii_digit()).count();
    let (num, unit) = s.split_at(digits);
    let Ok(n) = num.parse::<i64>() else {
        return fallback;
    };
    match unit {
        "s" => Duration::seconds(n),
        "m" => Duration::minutes(n),
        "h" => Duration::hours(n),
        "d" => Duration::days(n),
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issues_and_verifies_round_trip() {
        let jwt = JwtUtil::new("test-secret", "1h");
        let token = jwt.issue_token(42, "alice").unwrap();
        let claims = jwt.verify_token(&token).unwrap();
        assert_eq!(claims.sub, "42");
        assert_eq!(claims.username, "alice");
    }

    #[test]
    fn rejects_token_from_other_secret() {
        let jwt = JwtUtil::new("secret-a", "1h");
        let other = JwtUtil::new("secret-b", "1h");
        let token = jwt.issue_token(1, "bob").unwrap();
        assert!(other.verify_token(&token).is_err());
    }
}
