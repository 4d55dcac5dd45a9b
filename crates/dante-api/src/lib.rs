//! Dante API crate - axum HTTP backend for accounts, profiles and chat
//! session persistence.
//!
//! Serves the auth endpoints (`/auth/v1/*`), the server-side functions the
//! chat client calls (`/functions/v1/*`), the profile row and avatar storage,
//! and a health check.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod mailer;
pub mod rate_limit;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use mailer::{LogMailer, Mail, MailKind, Mailer, MemoryMailer};
pub use routes::{create_router, start_server};
pub use state::AppState;
