//! Dante storage crate - SQLite persistence for accounts, tokens, profiles
//! and chat sessions.
//!
//! Provides a WAL-mode SQLite database with migrations and one repository
//! per aggregate. The backend HTTP service is the only writer.

pub mod db;
pub mod migrations;
pub mod repository;

pub use db::Database;
pub use repository::{
    ProfileRepository, SaveOutcome, SessionRepository, StoredProfile, StoredSession,
    StoredUser, TokenKind, TokenRepository, UserRepository,
};
