//! Authentication and authorization
//!
//! Bearer tokens are HS256 JWTs whose subject is the user id and whose
//! `role` claim is one of `customer`, `trainer` or `admin`. Authorization
//! over individual bookings is decided in the domain (`Actor::ensure_can_*`).

use axum::{extract::FromRequestParts, http::request::Parts};
use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use core_kernel::UserId;
use domain_booking::{Actor, Role};

use crate::error::ApiError;

/// JWT claims
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    pub role: String,
    /// Expiration timestamp
    pub exp: i64,
    /// Issued at timestamp
    pub iat: i64,
}

impl Claims {
    /// The caller the domain authorizes against
    pub fn actor(&self) -> Result<Actor, AuthError> {
        let id: UserId = self.sub.parse().map_err(|_| AuthError::InvalidToken)?;
        let role: Role = self.role.parse().map_err(|_| AuthError::InvalidToken)?;
        Ok(Actor::new(id, role))
    }
}

/// Auth errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    TokenExpired,
}

/// Issues a token for `user_id` acting as `role`
pub fn create_token(
    user_id: UserId,
    role: Role,
    secret: &str,
    expiration_secs: u64,
) -> Result<String, AuthError> {
    let now = Utc::now();
    let exp = now + Duration::seconds(expiration_secs as i64);

    let claims = Claims {
        sub: user_id.as_uuid().to_string(),
        role: role.as_str().to_string(),
        exp: exp.timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|_| AuthError::InvalidToken)
}

/// Validates a token's signature and expiry
pub fn validate_token(token: &str, secret: &str) -> Result<Claims, AuthError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        _ => AuthError::InvalidToken,
    })?;

    Ok(token_data.claims)
}

/// The authenticated caller, as placed in request extensions by
/// [`crate::middleware::auth_middleware`]
#[derive(Debug, Clone, Copy)]
pub struct AuthActor(pub Actor);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthActor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let claims = parts.extensions.get::<Claims>().ok_or(ApiError::Unauthorized)?;
        claims.actor().map(AuthActor).map_err(|_| ApiError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn test_token_round_trip_yields_actor() {
        let user = UserId::new();
        let token = create_token(user, Role::Trainer, SECRET, 60).unwrap();
        let claims = validate_token(&token, SECRET).unwrap();
        let actor = claims.actor().unwrap();
        assert_eq!(actor.id, user);
        assert_eq!(actor.role, Role::Trainer);
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let token = create_token(UserId::new(), Role::Customer, SECRET, 60).unwrap();
        assert_eq!(validate_token(&token, "other"), Err(AuthError::InvalidToken));
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        let claims = Claims {
            sub: UserId::new().as_uuid().to_string(),
            role: "superuser".to_string(),
            exp: 0,
            iat: 0,
        };
        assert_eq!(claims.actor().unwrap_err(), AuthError::InvalidToken);
    }
}
