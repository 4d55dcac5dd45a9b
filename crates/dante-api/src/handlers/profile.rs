//! Profile row and avatar storage handlers.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use tracing::info;
use uuid::Uuid;

use dante_core::types::{AvatarResponse, Profile, UpdateProfileRequest};
use dante_core::validation::MAX_TITLE_CHARS;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Accepted avatar content types.
const AVATAR_TYPES: [&str; 3] = ["image/png", "image/jpeg", "image/webp"];

fn load_profile(state: &AppState, user_id: Uuid) -> Result<Profile, ApiError> {
    if let Some(profile) = state.profiles.get(user_id)? {
        return Ok(profile.to_profile());
    }
    let display_name = state
        .users
        .find_by_id(user_id)?
        .map(|u| u.display_name)
        .unwrap_or_default();
    Ok(state.profiles.ensure(user_id, &display_name)?.to_profile())
}

/// GET /rest/v1/profile - the caller's profile, created if absent.
pub async fn get_profile(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<Profile>, ApiError> {
    Ok(Json(load_profile(&state, auth.user_id)?))
}

/// PATCH /rest/v1/profile
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<UpdateProfileRequest>,
) -> Result<Json<Profile>, ApiError> {
    load_profile(&state, auth.user_id)?;

    if let Some(name) = body.display_name {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_TITLE_CHARS {
            return Err(ApiError::BadRequest(format!(
                "'display_name' must be 1 to {} characters",
                MAX_TITLE_CHARS
            )));
        }
        state.profiles.update_display_name(auth.user_id, name)?;
    }

    Ok(Json(load_profile(&state, auth.user_id)?))
}

/// PUT /storage/v1/avatar - replace the caller's avatar with the raw body.
pub async fn put_avatar(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<AvatarResponse>, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase())
        .unwrap_or_default();
    if !AVATAR_TYPES.contains(&content_type.as_str()) {
        return Err(ApiError::UnsupportedMediaType(format!(
            "Avatar must be one of: {}",
            AVATAR_TYPES.join(", ")
        )));
    }

    let max = state.config.server.max_avatar_bytes;
    if body.is_empty() {
        return Err(ApiError::BadRequest("Avatar body is empty".to_string()));
    }
    if body.len() > max {
        return Err(ApiError::PayloadTooLarge(format!(
            "Avatar exceeds {} bytes",
            max
        )));
    }

    load_profile(&state, auth.user_id)?;

    tokio::fs::create_dir_all(&state.avatar_dir)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to create avatar dir: {}", e)))?;
    let path = state.avatar_dir.join(auth.user_id.to_string());
    tokio::fs::write(&path, &body)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to write avatar: {}", e)))?;

    let avatar_url = state.public_url(&format!("/storage/v1/avatar/{}", auth.user_id));
    state
        .profiles
        .set_avatar(auth.user_id, &avatar_url, &content_type)?;

    info!(user_id = %auth.user_id, bytes = body.len(), content_type = %content_type, "Avatar stored");
    Ok(Json(AvatarResponse { avatar_url }))
}

/// GET /storage/v1/avatar/{user_id} - serve a stored avatar.
pub async fn get_avatar(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let not_found = || ApiError::NotFound(format!("No avatar for user {}", user_id));

    let content_type = state
        .profiles
        .get(user_id)?
        .and_then(|p| p.avatar_content_type)
        .ok_or_else(not_found)?;

    let bytes = match tokio::fs::read(state.avatar_dir.join(user_id.to_string())).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
        Err(e) => return Err(ApiError::Internal(format!("Failed to read avatar: {}", e))),
    };

    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}
