//! Database schema migrations.
//!
//! Applies the initial schema: users, auth_tokens, profiles, chat_sessions,
//! chat_messages and the schema_migrations bookkeeping table.

use rusqlite::Connection;
use tracing::info;

use dante_core::error::DanteError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), DanteError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| DanteError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| DanteError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema. Timestamps are unix milliseconds.
fn apply_v1(conn: &Connection) -> Result<(), DanteError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              TEXT PRIMARY KEY NOT NULL,
            email           TEXT NOT NULL UNIQUE COLLATE NOCASE,
            password_hash   TEXT NOT NULL,
            display_name    TEXT NOT NULL DEFAULT '',
            email_confirmed INTEGER NOT NULL DEFAULT 0,
            created_at      INTEGER NOT NULL
        );

        -- Access, email-confirmation and password-recovery tokens.
        CREATE TABLE IF NOT EXISTS auth_tokens (
            token           TEXT PRIMARY KEY NOT NULL,
            user_id         TEXT NOT NULL,
            kind            TEXT NOT NULL
                            CHECK (kind IN ('access', 'confirmation', 'recovery')),
            expires_at      INTEGER NOT NULL,
            used            INTEGER NOT NULL DEFAULT 0,
            created_at      INTEGER NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_auth_tokens_user
            ON auth_tokens (user_id, kind);

        CREATE TABLE IF NOT EXISTS profiles (
            user_id             TEXT PRIMARY KEY NOT NULL,
            display_name        TEXT NOT NULL DEFAULT '',
            avatar_url          TEXT,
            avatar_content_type TEXT,
            updated_at          INTEGER NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS chat_sessions (
            id              TEXT PRIMARY KEY NOT NULL,
            user_id         TEXT NOT NULL,
            title           TEXT NOT NULL DEFAULT '',
            agent_type      TEXT NOT NULL DEFAULT 'registral'
                            CHECK (agent_type IN ('registral', 'notarial')),
            created_at      INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_chat_sessions_user
            ON chat_sessions (user_id, updated_at DESC);

        CREATE TABLE IF NOT EXISTS chat_messages (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id      TEXT NOT NULL,
            msg_input       TEXT NOT NULL,
            msg_output      TEXT NOT NULL,
            created_at      INTEGER NOT NULL,
            FOREIGN KEY (session_id) REFERENCES chat_sessions(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_chat_messages_session
            ON chat_messages (session_id, id ASC);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| DanteError::Storage(format!("Migration v1 failed: {}", e)))?;

    Ok(())
}
