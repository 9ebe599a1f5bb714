//! Bearer-JWT authentication and per-route permission checks for the API
//! Gateway, grounded on the teacher's `domain_management_api.rs` JWT/
//! bcrypt pair.

use crate::errors::CoreError;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub permissions: Vec<String>,
    pub exp: usize,
}

impl Claims {
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission || p == "*")
    }
}

pub fn mint_token(secret: &str, subject: &str, permissions: Vec<String>, ttl: chrono::Duration) -> Result<String, CoreError> {
    let claims = Claims {
        sub: subject.to_string(),
        permissions,
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).map_err(|e| CoreError::Internal(e.to_string()))
}

fn verify_token(secret: &str, token: &str) -> Result<Claims, CoreError> {
    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &Validation::default())
        .map(|data| data.claims)
        .map_err(|e| CoreError::Unauthorized(e.to_string()))
}

/// Paths exempt from bearer-auth: the health check and first-launch
/// setup endpoints, per §4.10.
fn is_public_path(path: &str) -> bool {
    path == "/health" || path == "/health/detailed" || path.starts_with("/api/v1/setup/")
}

/// Applied to every route except the public ones; extracts and verifies
/// the bearer token, then inserts `Claims` into request extensions for
/// downstream handlers/extractors to read.
pub async fn require_bearer_auth(State(jwt_secret): State<Arc<String>>, mut request: Request, next: Next) -> Result<Response, CoreError> {
    if is_public_path(request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| CoreError::Unauthorized("missing authorization header".to_string()))?;

    let token = header.strip_prefix("Bearer ").ok_or_else(|| CoreError::Unauthorized("expected bearer token".to_string()))?;
    let claims = verify_token(&jwt_secret, token)?;
    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

/// Reject the request with 403 unless the verified claims cover
/// `permission`. Call from inside a handler after pulling `Claims` out
/// of request extensions.
pub fn require_permission(claims: &Claims, permission: &str) -> Result<(), CoreError> {
    if claims.has_permission(permission) {
        Ok(())
    } else {
        Err(CoreError::Forbidden(format!("missing permission: {permission}")))
    }
}
