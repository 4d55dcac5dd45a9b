//! Request authentication.
//!
//! Every client request carries the project's public key in the `apikey`
//! header. Signed-in requests additionally carry `Authorization: Bearer
//! <access token>`, resolved against the token table by [`require_user`].

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use rand::Rng;
use uuid::Uuid;

use dante_storage::TokenKind;

use crate::error::ApiError;
use crate::state::AppState;

/// Identity attached to a request by [`require_user`].
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub token: String,
}

/// Generate a random 32-character hex token.
pub fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    hex::encode(bytes)
}

pub fn hash_password(password: &str, cost: u32) -> Result<String, ApiError> {
    bcrypt::hash(password, cost)
        .map_err(|e| ApiError::Internal(format!("Failed to hash password: {}", e)))
}

/// Malformed stored hashes count as a mismatch.
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

/// Extract the bearer token from the Authorization header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let value = headers
        .get("authorization")
        .ok_or_else(|| ApiError::Unauthorized("Missing Authorization header".to_string()))?;
    let value = value.to_str().map_err(|_| {
        ApiError::Unauthorized("Invalid Authorization header encoding".to_string())
    })?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("Invalid bearer token".to_string()))
}

/// Middleware that checks the `apikey` header against the configured
/// public key. Returns 401 if missing or wrong.
pub async fn require_api_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let presented = req.headers().get("apikey").and_then(|v| v.to_str().ok());
    match presented {
        Some(key) if key == state.config.server.public_key => next.run(req).await,
        Some(_) => ApiError::Unauthorized("Invalid API key".to_string()).into_response(),
        None => ApiError::Unauthorized("Missing apikey header".to_string()).into_response(),
    }
}

/// Middleware that resolves the bearer access token to a user.
///
/// On success the [`AuthUser`] is inserted as a request extension.
pub async fn require_user(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let token = match bearer_token(req.headers()) {
        Ok(t) => t.to_string(),
        Err(e) => return e.into_response(),
    };

    match state
        .tokens
        .find_valid(&token, TokenKind::Access, chrono::Utc::now())
    {
        Ok(Some(user_id)) => {
            req.extensions_mut().insert(AuthUser { user_id, token });
            next.run(req).await
        }
        Ok(None) => {
            ApiError::Unauthorized("Session expired or invalid".to_string()).into_response()
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Reject a body whose `user_id` differs from the authenticated user.
pub fn ensure_same_user(auth: &AuthUser, body_user: Uuid) -> Result<(), ApiError> {
    if auth.user_id != body_user {
        return Err(ApiError::Forbidden(
            "user_id does not match the authenticated user".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_generate_token_shape() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_password_hash_roundtrip() {
        let hash = hash_password("secreto", 4).unwrap();
        assert!(verify_password("secreto", &hash));
        assert!(!verify_password("otro", &hash));
        assert!(!verify_password("secreto", "not-a-hash"));
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_err());

        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert!(bearer_token(&headers).is_err());

        headers.insert("authorization", HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_token(&headers).unwrap(), "abc123");
    }

    #[test]
    fn test_ensure_same_user() {
        let auth = AuthUser {
            user_id: Uuid::new_v4(),
            token: "t".to_string(),
        };
        assert!(ensure_same_user(&auth, auth.user_id).is_ok());
        assert!(matches!(
            ensure_same_user(&auth, Uuid::new_v4()),
            Err(ApiError::Forbidden(_))
        ));
    }
}
