//! Client-side auth gateway.
//!
//! Validates input locally before any network call, maps backend failures
//! to user-facing [`AuthFailure`]s and persists the signed-in session under
//! [`AUTH_SESSION_KEY`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use dante_core::types::{SignUpRequest, TokenRequest};
use dante_core::validation::{validate_confirmation, validate_email, validate_password};

use crate::backend::AuthBackend;
use crate::error::{AuthFailure, BackendError};
use crate::store::KeyValueStore;

/// Store key of the persisted auth session.
pub const AUTH_SESSION_KEY: &str = "dante_auth_session";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub user_id: Uuid,
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignUpOutcome {
    /// A confirmation mail was sent; sign-in fails until it is followed.
    ConfirmationRequired { user_id: Uuid },
    /// The account can sign in right away.
    Ready { user_id: Uuid },
}

fn unavailable(err: BackendError) -> AuthFailure {
    AuthFailure::Unavailable(err.to_string())
}

pub struct AuthGateway {
    backend: Arc<dyn AuthBackend>,
    store: Arc<dyn KeyValueStore>,
    min_password_len: usize,
}

impl AuthGateway {
    pub fn new(
        backend: Arc<dyn AuthBackend>,
        store: Arc<dyn KeyValueStore>,
        min_password_len: usize,
    ) -> Self {
        Self {
            backend,
            store,
            min_password_len,
        }
    }

    /// Sign in with email and password and persist the session.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, AuthFailure> {
        validate_email(email)?;
        validate_password(password, self.min_password_len)?;

        let request = TokenRequest {
            email: email.trim().to_string(),
            password: password.to_string(),
        };
        let token = self.backend.sign_in(&request).await.map_err(|e| match e {
            BackendError::Unauthorized(_) => AuthFailure::InvalidCredentials,
            BackendError::Forbidden(_) => AuthFailure::EmailNotConfirmed,
            other => unavailable(other),
        })?;

        let session = AuthSession {
            access_token: token.access_token,
            user_id: token.user_id,
            email: token.email,
            expires_at: token.expires_at,
        };
        self.persist(&session);
        info!(user_id = %session.user_id, "Signed in");
        Ok(session)
    }

    /// Create an account. The confirmation must match the password.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        confirmation: &str,
        display_name: &str,
    ) -> Result<SignUpOutcome, AuthFailure> {
        validate_email(email)?;
        validate_password(password, self.min_password_len)?;
        validate_confirmation(password, confirmation)?;

        let request = SignUpRequest {
            email: email.trim().to_string(),
            password: password.to_string(),
            display_name: display_name.trim().to_string(),
        };
        let response = self.backend.sign_up(&request).await.map_err(|e| match e {
            BackendError::Conflict(_) => AuthFailure::EmailTaken,
            other => unavailable(other),
        })?;

        Ok(if response.confirmation_required {
            SignUpOutcome::ConfirmationRequired {
                user_id: response.user_id,
            }
        } else {
            SignUpOutcome::Ready {
                user_id: response.user_id,
            }
        })
    }

    /// Ask the backend to mail a recovery link.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), AuthFailure> {
        validate_email(email)?;
        self.backend
            .recover(email.trim())
            .await
            .map_err(unavailable)
    }

    /// Set a new password with the token from a recovery mail.
    pub async fn update_password(
        &self,
        recovery_token: &str,
        password: &str,
        confirmation: &str,
    ) -> Result<(), AuthFailure> {
        validate_password(password, self.min_password_len)?;
        validate_confirmation(password, confirmation)?;

        self.backend
            .update_password(recovery_token.trim(), password)
            .await
            .map_err(|e| match e {
                BackendError::Unauthorized(_) => AuthFailure::RecoveryExpired,
                other => unavailable(other),
            })?;

        // Every access token was revoked server-side.
        self.forget();
        Ok(())
    }

    /// Forget the local session and revoke it server-side, best effort.
    pub async fn sign_out(&self) -> Result<(), AuthFailure> {
        let session = self.current_session().ok_or(AuthFailure::NotSignedIn)?;
        self.forget();
        if let Err(e) = self.backend.sign_out(&session.access_token).await {
            warn!(error = %e, "Server-side sign-out failed");
        }
        info!(user_id = %session.user_id, "Signed out");
        Ok(())
    }

    /// The persisted session, unless missing, malformed or expired.
    pub fn current_session(&self) -> Option<AuthSession> {
        let raw = match self.store.get(AUTH_SESSION_KEY) {
            Ok(raw) => raw?,
            Err(e) => {
                debug!(error = %e, "Auth session read failed");
                return None;
            }
        };
        match serde_json::from_str::<AuthSession>(&raw) {
            Ok(session) if !session.is_expired(Utc::now()) => Some(session),
            Ok(_) => {
                debug!("Persisted auth session expired");
                self.forget();
                None
            }
            Err(_) => {
                debug!("Discarding malformed auth session");
                self.forget();
                None
            }
        }
    }

    fn persist(&self, session: &AuthSession) {
        let result = serde_json::to_string(session)
            .map_err(dante_core::DanteError::from)
            .and_then(|json| self.store.set(AUTH_SESSION_KEY, &json));
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist auth session");
        }
    }

    fn forget(&self) {
        if let Err(e) = self.store.remove(AUTH_SESSION_KEY) {
            warn!(error = %e, "Failed to remove auth session");
        }
    }
}
