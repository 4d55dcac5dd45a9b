//! Best-effort local snapshot of the session list and UI state.
//!
//! The snapshot lets the client paint the session list instantly before the
//! authoritative list arrives. It never holds message bodies or tokens.
//! Failures are logged and swallowed; a malformed snapshot is discarded.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::store::KeyValueStore;

/// Store key of the snapshot.
pub const CACHE_KEY: &str = "dante_chat_cache";

/// Written into every snapshot. Not checked on load.
pub const CACHE_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub message_count: usize,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiState {
    #[serde(default)]
    pub current_session_id: Option<String>,
    #[serde(default)]
    pub is_welcome_mode: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub user_id: Uuid,
    pub sessions: Vec<SessionSummary>,
    pub ui_state: UiState,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub version: String,
}

impl CacheSnapshot {
    pub fn new(user_id: Uuid, sessions: Vec<SessionSummary>, ui_state: UiState) -> Self {
        Self {
            user_id,
            sessions,
            ui_state,
            timestamp: Utc::now(),
            version: CACHE_VERSION.to_string(),
        }
    }
}

/// Shape check done before typed decoding.
fn has_required_shape(value: &Value) -> bool {
    value.get("user_id").is_some_and(Value::is_string)
        && value.get("sessions").is_some_and(Value::is_array)
        && value.get("ui_state").is_some_and(Value::is_object)
}

/// Reads and writes the snapshot under [`CACHE_KEY`].
#[derive(Clone)]
pub struct SessionCache {
    store: Arc<dyn KeyValueStore>,
}

impl SessionCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// The stored snapshot, or `None` if absent or malformed. A malformed
    /// snapshot is cleared.
    pub fn load(&self) -> Option<CacheSnapshot> {
        let raw = match self.store.get(CACHE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                debug!(error = %e, "Cache read failed");
                return None;
            }
        };

        let parsed = serde_json::from_str::<Value>(&raw)
            .ok()
            .filter(has_required_shape)
            .and_then(|v| serde_json::from_value::<CacheSnapshot>(v).ok());

        if parsed.is_none() {
            debug!("Discarding malformed cache snapshot");
            self.clear();
        }
        parsed
    }

    /// Like [`load`](Self::load), but a snapshot written for a different
    /// user is cleared and ignored.
    pub fn load_for(&self, user_id: Uuid) -> Option<CacheSnapshot> {
        let snapshot = self.load()?;
        if snapshot.user_id != user_id {
            debug!("Discarding cache snapshot of another user");
            self.clear();
            return None;
        }
        Some(snapshot)
    }

    /// Persist the snapshot. Last writer wins.
    pub fn save(&self, snapshot: &CacheSnapshot) {
        let result = serde_json::to_string(snapshot)
            .map_err(dante_core::DanteError::from)
            .and_then(|json| self.store.set(CACHE_KEY, &json));
        if let Err(e) = result {
            warn!(error = %e, "Cache write failed");
        }
    }

    pub fn clear(&self) {
        if let Err(e) = self.store.remove(CACHE_KEY) {
            warn!(error = %e, "Cache clear failed");
        }
    }
}
