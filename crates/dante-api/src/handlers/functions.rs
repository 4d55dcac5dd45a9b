//! `/functions/v1/*` handlers: the server-side functions the chat client
//! calls to create, load, append to, rename and delete chat sessions.
//!
//! All of them run behind `require_user`. Bodies that name a `user_id` must
//! name the authenticated user.

use axum::extract::State;
use axum::{Extension, Json};
use tracing::{debug, info};
use uuid::Uuid;

use dante_core::types::{
    CreateSessionRequest, CreateSessionResponse, DeleteSessionRequest, Exchange,
    LoadUserDataResponse, RenameSessionRequest, SaveExchangeRequest, SaveExchangeResponse,
};
use dante_core::validation::{derive_title, validate_title, DEFAULT_TITLE, MAX_TITLE_CHARS};

use crate::auth::{ensure_same_user, AuthUser};
use crate::error::ApiError;
use crate::handlers::ActionResult;
use crate::state::AppState;

/// POST /functions/v1/create-session-on-login - allocate an empty session.
///
/// The client also uses this to obtain a fresh id when a provisional one is
/// rejected by save-exchange.
pub async fn create_session_on_login(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<CreateSessionRequest>,
) -> Result<Json<CreateSessionResponse>, ApiError> {
    let id = Uuid::new_v4().to_string();
    let agent = body.agent_type.unwrap_or_default();
    state
        .sessions
        .create(&id, auth.user_id, DEFAULT_TITLE, agent)?;

    info!(user_id = %auth.user_id, session_id = %id, agent = %agent, "Session created");
    Ok(Json(CreateSessionResponse {
        chat_session_id: id,
    }))
}

/// POST /functions/v1/load-user-data - every session of the caller with its
/// exchanges, most recently updated first.
pub async fn load_user_data(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<LoadUserDataResponse>, ApiError> {
    let chat_sessions = state.sessions.list_with_messages(auth.user_id)?;
    debug!(user_id = %auth.user_id, sessions = chat_sessions.len(), "User data loaded");
    Ok(Json(LoadUserDataResponse {
        user_id: auth.user_id,
        chat_sessions,
    }))
}

/// POST /functions/v1/save-exchange - append one exchange.
///
/// Creates the session row if it does not exist yet. A session id owned by
/// another user is answered with 409.
pub async fn save_exchange(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<SaveExchangeRequest>,
) -> Result<Json<SaveExchangeResponse>, ApiError> {
    ensure_same_user(&auth, body.user_id)?;

    if body.chat_session_id.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "'chat_session_id' must not be empty".to_string(),
        ));
    }

    let title = if body.chat_session_title.trim().is_empty() {
        derive_title(&body.msg_input, state.config.chat.title_max_chars)
    } else {
        body.chat_session_title.chars().take(MAX_TITLE_CHARS).collect()
    };

    let outcome = state.sessions.save_exchange(
        &body.chat_session_id,
        auth.user_id,
        &title,
        body.agent_type,
        &Exchange {
            msg_input: body.msg_input,
            msg_output: body.msg_output,
        },
    )?;

    debug!(
        user_id = %auth.user_id,
        session_id = %body.chat_session_id,
        message_id = outcome.message_id,
        session_created = outcome.session_created,
        "Exchange saved"
    );

    Ok(Json(SaveExchangeResponse {
        chat_session_id: body.chat_session_id,
        message_id: outcome.message_id,
    }))
}

/// POST /functions/v1/rename-session
pub async fn rename_session(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<RenameSessionRequest>,
) -> Result<Json<ActionResult>, ApiError> {
    ensure_same_user(&auth, body.user_id)?;
    let title = body.new_title.trim();
    validate_title(title)?;
    if !state
        .sessions
        .rename(&body.chat_session_id, auth.user_id, title)?
    {
        return Err(ApiError::NotFound(format!(
            "Session '{}' not found",
            body.chat_session_id
        )));
    }

    info!(user_id = %auth.user_id, session_id = %body.chat_session_id, "Session renamed");
    Ok(Json(ActionResult::ok("Session renamed")))
}

/// POST /functions/v1/delete-session - delete a session and its messages.
pub async fn delete_session(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<DeleteSessionRequest>,
) -> Result<Json<ActionResult>, ApiError> {
    ensure_same_user(&auth, body.user_id)?;

    if !state.sessions.delete(&body.chat_session_id, auth.user_id)? {
        return Err(ApiError::NotFound(format!(
            "Session '{}' not found",
            body.chat_session_id
        )));
    }

    info!(user_id = %auth.user_id, session_id = %body.chat_session_id, "Session deleted");
    Ok(Json(ActionResult::ok("Session deleted")))
}
