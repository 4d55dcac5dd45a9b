//! `/auth/v1/*` handlers: sign-up, email confirmation, password sign-in,
//! sign-out, password recovery and password update.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::{Extension, Json};
use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use dante_core::types::{
    RecoverRequest, SignUpRequest, SignUpResponse, TokenRequest, TokenResponse,
    UpdatePasswordRequest,
};
use dante_core::validation::{validate_email, validate_password};
use dante_storage::TokenKind;

use crate::auth::{bearer_token, generate_token, hash_password, verify_password, AuthUser};
use crate::error::ApiError;
use crate::handlers::ActionResult;
use crate::mailer::{Mail, MailKind};
use crate::state::AppState;

/// Lifetime of an email confirmation link.
const CONFIRMATION_TTL_HOURS: i64 = 24;

#[derive(Debug, Deserialize)]
pub struct ConfirmParams {
    pub token: String,
}

/// POST /auth/v1/signup - create an account.
///
/// When email confirmation is required a confirmation mail is sent and
/// sign-in is refused until the link is followed.
pub async fn signup(
    State(state): State<AppState>,
    Json(body): Json<SignUpRequest>,
) -> Result<Json<SignUpResponse>, ApiError> {
    validate_email(&body.email)?;
    validate_password(&body.password, state.config.auth.min_password_len)?;

    let confirmation_required = state.config.auth.require_email_confirmation;
    let hash = hash_password(&body.password, state.password_cost)?;
    let user = state
        .users
        .create(&body.email, &hash, &body.display_name, !confirmation_required)?;

    if confirmation_required {
        let token = generate_token();
        state.tokens.insert(
            &token,
            user.id,
            TokenKind::Confirmation,
            Utc::now() + Duration::hours(CONFIRMATION_TTL_HOURS),
        )?;
        let mail = Mail {
            to: user.email.clone(),
            kind: MailKind::Confirmation,
            link: state.public_url(&format!("/auth/v1/confirm?token={}", token)),
            token,
        };
        if let Err(e) = state.mailer.send(&mail) {
            warn!(error = %e, user_id = %user.id, "Failed to send confirmation mail");
        }
    }

    info!(user_id = %user.id, confirmation_required, "Account created");

    Ok(Json(SignUpResponse {
        user_id: user.id,
        confirmation_required,
    }))
}

/// GET /auth/v1/confirm?token= - confirm an email address.
pub async fn confirm(
    State(state): State<AppState>,
    Query(params): Query<ConfirmParams>,
) -> Result<Json<ActionResult>, ApiError> {
    let user_id = state
        .tokens
        .find_valid(&params.token, TokenKind::Confirmation, Utc::now())?
        .ok_or_else(|| ApiError::Unauthorized("Confirmation link invalid or expired".to_string()))?;

    state.tokens.mark_used(&params.token)?;
    state.users.confirm_email(user_id)?;

    info!(user_id = %user_id, "Email confirmed");
    Ok(Json(ActionResult::ok("Email confirmed")))
}

/// POST /auth/v1/token - exchange email and password for an access token.
///
/// The profile row is created here on first successful sign-in.
pub async fn token(
    State(state): State<AppState>,
    Json(body): Json<TokenRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let invalid = || ApiError::Unauthorized("Invalid login credentials".to_string());

    let user = state.users.find_by_email(&body.email)?.ok_or_else(invalid)?;
    if !verify_password(&body.password, &user.password_hash) {
        return Err(invalid());
    }
    if state.config.auth.require_email_confirmation && !user.email_confirmed {
        return Err(ApiError::Forbidden("Email not confirmed".to_string()));
    }

    let access_token = generate_token();
    let expires_at = Utc::now() + Duration::hours(i64::from(state.config.auth.session_ttl_hours));
    state
        .tokens
        .insert(&access_token, user.id, TokenKind::Access, expires_at)?;
    state.profiles.ensure(user.id, &user.display_name)?;

    info!(user_id = %user.id, "User signed in");

    Ok(Json(TokenResponse {
        access_token,
        user_id: user.id,
        email: user.email,
        expires_at,
    }))
}

/// POST /auth/v1/logout - revoke the presented access token.
pub async fn logout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<StatusCode, ApiError> {
    state.tokens.revoke(&auth.token)?;
    info!(user_id = %auth.user_id, "User signed out");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /auth/v1/recover - send a password recovery mail.
///
/// Always answers 200 so the endpoint cannot be used to probe which emails
/// have accounts.
pub async fn recover(
    State(state): State<AppState>,
    Json(body): Json<RecoverRequest>,
) -> Result<Json<ActionResult>, ApiError> {
    validate_email(&body.email)?;

    if let Some(user) = state.users.find_by_email(&body.email)? {
        let token = generate_token();
        let expires_at =
            Utc::now() + Duration::minutes(i64::from(state.config.auth.recovery_ttl_minutes));
        state
            .tokens
            .insert(&token, user.id, TokenKind::Recovery, expires_at)?;
        let mail = Mail {
            to: user.email.clone(),
            kind: MailKind::Recovery,
            link: state.public_url(&format!("/auth/v1/verify?type=recovery&token={}", token)),
            token,
        };
        if let Err(e) = state.mailer.send(&mail) {
            warn!(error = %e, user_id = %user.id, "Failed to send recovery mail");
        }
    }

    Ok(Json(ActionResult::ok(
        "If the address has an account, a recovery email is on its way",
    )))
}

/// PUT /auth/v1/user - set a new password using a recovery token.
///
/// The recovery token is single use. Every access token of the user is
/// revoked so other devices must sign in again.
pub async fn update_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<UpdatePasswordRequest>,
) -> Result<Json<ActionResult>, ApiError> {
    let token = bearer_token(&headers)?;
    let user_id = state
        .tokens
        .find_valid(token, TokenKind::Recovery, Utc::now())?
        .ok_or_else(|| ApiError::Unauthorized("Recovery session expired".to_string()))?;

    validate_password(&body.password, state.config.auth.min_password_len)?;

    if !state.tokens.mark_used(token)? {
        return Err(ApiError::Unauthorized("Recovery session expired".to_string()));
    }

    let hash = hash_password(&body.password, state.password_cost)?;
    state.users.update_password(user_id, &hash)?;
    let revoked = state.tokens.revoke_all(user_id, TokenKind::Access)?;

    info!(user_id = %user_id, revoked_sessions = revoked, "Password updated");
    Ok(Json(ActionResult::ok("Password updated")))
}
