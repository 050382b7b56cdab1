use crate::error::AppError;
use crate::state::AppState;
use axum::{extract::FromRequestParts, http::request::Parts};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use types::prelude::UserId;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id (uuid)
    pub sub: String,
    pub username: String,
    pub exp: usize,
}

/// The authenticated identity attached to a connection or request
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: UserId,
    pub username: String,
}

/// Validate a bearer token and extract the identity
///
/// Rejects missing signature, expired tokens, and malformed subjects.
pub fn verify_token(token: &str, secret: &str) -> Result<Identity, AppError> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    let data = decode::<Claims>(token, &key, &Validation::default())
        .map_err(|err| AppError::Unauthorized(format!("Invalid token: {}", err)))?;

    let user_uuid: Uuid = data
        .claims
        .sub
        .parse()
        .map_err(|_| AppError::Unauthorized("Invalid token subject".to_string()))?;

    Ok(Identity {
        user_id: UserId::from_uuid(user_uuid),
        username: data.claims.username,
    })
}

/// Issue a bearer token (seed tooling and tests)
pub fn issue_token(
    user_id: UserId,
    username: &str,
    secret: &str,
    ttl: Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims {
        sub: user_id.to_string(),
        username: username.to_string(),
        exp: (Utc::now() + ttl).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Pull a bearer token out of an Authorization header value
pub fn bearer_token(header_value: &str) -> Option<&str> {
    header_value.strip_prefix("Bearer ")
}

pub struct AuthenticatedUser(pub Identity);

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get("Authorization")
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("Missing authentication credentials".into()))?;

        let token = bearer_token(header)
            .ok_or_else(|| AppError::Unauthorized("Expected a bearer token".into()))?;

        Ok(AuthenticatedUser(verify_token(token, &state.jwt_secret)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn test_token_roundtrip() {
        let user_id = UserId::new();
        let token = issue_token(user_id, "alice", SECRET, Duration::minutes(5)).unwrap();

        let identity = verify_token(&token, SECRET).unwrap();
        assert_eq!(identity.user_id, user_id);
        assert_eq!(identity.username, "alice");
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = issue_token(UserId::new(), "alice", SECRET, Duration::minutes(5)).unwrap();
        assert!(verify_token(&token, "other-secret").is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let token = issue_token(UserId::new(), "alice", SECRET, Duration::minutes(-5)).unwrap();
        assert!(verify_token(&token, SECRET).is_err());
    }

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(bearer_token("Bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(bearer_token("Basic dXNlcg=="), None);
    }
}
