//! Application state shared across all route handlers.
//!
//! AppState holds the configuration, the database with one repository per
//! aggregate, and the mailer. It is passed to handlers via axum's State
//! extractor.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use dante_core::config::DanteConfig;
use dante_storage::{
    Database, ProfileRepository, SessionRepository, TokenRepository, UserRepository,
};

use crate::mailer::Mailer;

/// Shared application state.
///
/// All fields use `Arc` for cheap cloning across handler tasks.
#[derive(Clone)]
pub struct AppState {
    /// Backend configuration. Read-only once the server is running.
    pub config: Arc<DanteConfig>,
    pub database: Arc<Database>,
    pub users: Arc<UserRepository>,
    pub tokens: Arc<TokenRepository>,
    pub profiles: Arc<ProfileRepository>,
    pub sessions: Arc<SessionRepository>,
    /// Outbound confirmation and recovery mail.
    pub mailer: Arc<dyn Mailer>,
    /// Directory holding one avatar file per user.
    pub avatar_dir: PathBuf,
    /// bcrypt work factor.
    pub password_cost: u32,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Create a new AppState. Avatars live under `<data_dir>/avatars`.
    pub fn new(config: DanteConfig, database: Database, mailer: Arc<dyn Mailer>) -> Self {
        let avatar_dir = config.general.data_path().join("avatars");
        let database = Arc::new(database);
        Self {
            config: Arc::new(config),
            users: Arc::new(UserRepository::new(Arc::clone(&database))),
            tokens: Arc::new(TokenRepository::new(Arc::clone(&database))),
            profiles: Arc::new(ProfileRepository::new(Arc::clone(&database))),
            sessions: Arc::new(SessionRepository::new(Arc::clone(&database))),
            database,
            mailer,
            avatar_dir,
            password_cost: bcrypt::DEFAULT_COST,
            start_time: Instant::now(),
        }
    }

    /// Link embedded in account mails and avatar URLs.
    pub fn public_url(&self, path: &str) -> String {
        format!(
            "{}{}",
            self.config.server.public_url.trim_end_matches('/'),
            path
        )
    }
}
