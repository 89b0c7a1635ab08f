//! Bearer-token authentication.
//!
//! Tokens are issued elsewhere; this service only verifies the HS256
//! signature and reads the subject and role out of the claims.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use shared::Role;
use tracing::warn;
use uuid::Uuid;

use crate::api::AppState;
use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: Uuid,
    pub role: Role,
    pub exp: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: Uuid,
    pub role: Role,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn verify(&self, token: &str) -> Result<CurrentUser, AppError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AppError::Unauthorized("Token expired.".to_string()),
            _ => AppError::Unauthorized("Invalid token.".to_string()),
        })?;
        Ok(CurrentUser {
            id: data.claims.user_id,
            role: data.claims.role,
        })
    }
}

fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<CurrentUser>() {
            return Ok(*user);
        }

        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("No token provided.".to_string()))?;
        let token =
            bearer_token(header).ok_or_else(|| AppError::Unauthorized("Invalid authorization header.".to_string()))?;

        let user = state.tokens.verify(token).map_err(|e| {
            warn!(uri = %parts.uri, error = %e, "Rejected bearer token");
            e
        })?;
        parts.extensions.insert(user);
        Ok(user)
    }
}

#[cfg(test)]
pub fn sign(secret: &str, user_id: Uuid, role: Role) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let exp = (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize;
    encode(
        &Header::new(Algorithm::HS256),
        &Claims { user_id, role, exp },
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}
