//! Route handler functions for all API endpoints.
//!
//! Each handler extracts its inputs via axum extractors, works against the
//! repositories in AppState and returns JSON responses.

pub mod auth;
pub mod functions;
pub mod profile;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

pub use auth::{confirm, logout, recover, signup, token, update_user, ConfirmParams};
pub use functions::{
    create_session_on_login, delete_session, load_user_data, rename_session, save_exchange,
};
pub use profile::{get_avatar, get_profile, put_avatar, update_profile};

/// Generic acknowledgement for mutations that return no entity.
#[derive(Debug, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
}

impl ActionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// GET /health - health check.
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    }))
}
