//! Repository implementations for SQLite-backed persistence.
//!
//! Provides UserRepository, TokenRepository, ProfileRepository and
//! SessionRepository that operate on the Database struct using raw SQL.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::OptionalExtension;
use uuid::Uuid;

use dante_core::error::DanteError;
use dante_core::types::{AgentType, Exchange, Profile, RemoteSession, User};

use crate::db::Database;

fn storage_err(e: rusqlite::Error) -> DanteError {
    DanteError::Storage(e.to_string())
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

fn parse_uuid(s: &str) -> Result<Uuid, DanteError> {
    Uuid::parse_str(s).map_err(|e| DanteError::Storage(format!("Invalid UUID: {}", e)))
}

// ============================================================================
// Users
// ============================================================================

/// A user row including the password hash. Never leaves the backend.
#[derive(Debug, Clone)]
pub struct StoredUser {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub display_name: String,
    pub email_confirmed: bool,
    pub created_at: DateTime<Utc>,
}

impl StoredUser {
    /// Public view without credentials.
    pub fn to_user(&self) -> User {
        User {
            id: self.id,
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            email_confirmed: self.email_confirmed,
            created_at: self.created_at,
        }
    }
}

/// Repository for user accounts.
pub struct UserRepository {
    db: Arc<Database>,
}

impl UserRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create an account. Fails with `Conflict` if the email is taken.
    pub fn create(
        &self,
        email: &str,
        password_hash: &str,
        display_name: &str,
        email_confirmed: bool,
    ) -> Result<StoredUser, DanteError> {
        let user = StoredUser {
            id: Uuid::new_v4(),
            email: email.trim().to_lowercase(),
            password_hash: password_hash.to_string(),
            display_name: display_name.trim().to_string(),
            email_confirmed,
            created_at: Utc::now(),
        };

        self.db.with_conn(|conn| {
            let exists: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM users WHERE email = ?1",
                    [&user.email],
                    |row| row.get(0),
                )
                .map_err(storage_err)?;
            if exists > 0 {
                return Err(DanteError::Conflict("email already registered".to_string()));
            }

            conn.execute(
                "INSERT INTO users (id, email, password_hash, display_name, email_confirmed, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    user.id.to_string(),
                    user.email,
                    user.password_hash,
                    user.display_name,
                    user.email_confirmed as i32,
                    to_millis(user.created_at),
                ],
            )
            .map_err(|e| DanteError::Storage(format!("Failed to create user: {}", e)))?;
            Ok(())
        })?;

        Ok(user)
    }

    pub fn find_by_email(&self, email: &str) -> Result<Option<StoredUser>, DanteError> {
        let email = email.trim().to_lowercase();
        self.find_where("email = ?1", &email)
    }

    pub fn find_by_id(&self, id: Uuid) -> Result<Option<StoredUser>, DanteError> {
        self.find_where("id = ?1", &id.to_string())
    }

    fn find_where(&self, clause: &str, value: &str) -> Result<Option<StoredUser>, DanteError> {
        let sql = format!(
            "SELECT id, email, password_hash, display_name, email_confirmed, created_at
             FROM users WHERE {}",
            clause
        );
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(&sql, [value], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                })
                .optional()
                .map_err(storage_err)?;

            match row {
                Some((id, email, password_hash, display_name, confirmed, created_at)) => {
                    Ok(Some(StoredUser {
                        id: parse_uuid(&id)?,
                        email,
                        password_hash,
                        display_name,
                        email_confirmed: confirmed != 0,
                        created_at: from_millis(created_at),
                    }))
                }
                None => Ok(None),
            }
        })
    }

    pub fn confirm_email(&self, id: Uuid) -> Result<(), DanteError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET email_confirmed = 1 WHERE id = ?1",
                [id.to_string()],
            )
            .map_err(storage_err)?;
            Ok(())
        })
    }

    pub fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), DanteError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE users SET password_hash = ?1 WHERE id = ?2",
                    rusqlite::params![password_hash, id.to_string()],
                )
                .map_err(storage_err)?;
            if changed == 0 {
                return Err(DanteError::NotFound(format!("user {}", id)));
            }
            Ok(())
        })
    }
}

// ============================================================================
// Tokens
// ============================================================================

/// Purpose of an issued token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Confirmation,
    Recovery,
}

impl TokenKind {
    fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Confirmation => "confirmation",
            TokenKind::Recovery => "recovery",
        }
    }
}

/// Repository for access, confirmation and recovery tokens.
pub struct TokenRepository {
    db: Arc<Database>,
}

impl TokenRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Store a token for `user_id` valid until `expires_at`.
    pub fn insert(
        &self,
        token: &str,
        user_id: Uuid,
        kind: TokenKind,
        expires_at: DateTime<Utc>,
    ) -> Result<(), DanteError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO auth_tokens (token, user_id, kind, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    token,
                    user_id.to_string(),
                    kind.as_str(),
                    to_millis(expires_at),
                    to_millis(Utc::now()),
                ],
            )
            .map_err(|e| DanteError::Storage(format!("Failed to store token: {}", e)))?;
            Ok(())
        })
    }

    /// Resolve an unused, unexpired token of the given kind to its user.
    pub fn find_valid(
        &self,
        token: &str,
        kind: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>, DanteError> {
        self.db.with_conn(|conn| {
            let user_id: Option<String> = conn
                .query_row(
                    "SELECT user_id FROM auth_tokens
                     WHERE token = ?1 AND kind = ?2 AND used = 0 AND expires_at > ?3",
                    rusqlite::params![token, kind.as_str(), to_millis(now)],
                    |row| row.get(0),
                )
                .optional()
                .map_err(storage_err)?;
            user_id.as_deref().map(parse_uuid).transpose()
        })
    }

    /// Consume a single-use token. Returns false if it was already used.
    pub fn mark_used(&self, token: &str) -> Result<bool, DanteError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE auth_tokens SET used = 1 WHERE token = ?1 AND used = 0",
                    [token],
                )
                .map_err(storage_err)?;
            Ok(changed == 1)
        })
    }

    pub fn revoke(&self, token: &str) -> Result<(), DanteError> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM auth_tokens WHERE token = ?1", [token])
                .map_err(storage_err)?;
            Ok(())
        })
    }

    /// Revoke every token of `kind` held by the user.
    pub fn revoke_all(&self, user_id: Uuid, kind: TokenKind) -> Result<usize, DanteError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM auth_tokens WHERE user_id = ?1 AND kind = ?2",
                rusqlite::params![user_id.to_string(), kind.as_str()],
            )
            .map_err(storage_err)
        })
    }

    /// Delete expired tokens. Returns the number removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, DanteError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM auth_tokens WHERE expires_at <= ?1",
                [to_millis(now)],
            )
            .map_err(storage_err)
        })
    }
}

// ============================================================================
// Profiles
// ============================================================================

#[derive(Debug, Clone)]
pub struct StoredProfile {
    pub user_id: Uuid,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub avatar_content_type: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl StoredProfile {
    pub fn to_profile(&self) -> Profile {
        Profile {
            user_id: self.user_id,
            display_name: self.display_name.clone(),
            avatar_url: self.avatar_url.clone(),
            updated_at: self.updated_at,
        }
    }
}

/// Repository for the one-row-per-user profile table.
pub struct ProfileRepository {
    db: Arc<Database>,
}

impl ProfileRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn get(&self, user_id: Uuid) -> Result<Option<StoredProfile>, DanteError> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT display_name, avatar_url, avatar_content_type, updated_at
                     FROM profiles WHERE user_id = ?1",
                    [user_id.to_string()],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, i64>(3)?,
                        ))
                    },
                )
                .optional()
                .map_err(storage_err)?;

            Ok(row.map(
                |(display_name, avatar_url, avatar_content_type, updated_at)| StoredProfile {
                    user_id,
                    display_name,
                    avatar_url,
                    avatar_content_type,
                    updated_at: from_millis(updated_at),
                },
            ))
        })
    }

    /// Return the profile, creating an empty one first if absent.
    pub fn ensure(&self, user_id: Uuid, display_name: &str) -> Result<StoredProfile, DanteError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO profiles (user_id, display_name, updated_at)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![user_id.to_string(), display_name, to_millis(Utc::now())],
            )
            .map_err(|e| DanteError::Storage(format!("Failed to create profile: {}", e)))?;
            Ok(())
        })?;

        self.get(user_id)?
            .ok_or_else(|| DanteError::NotFound(format!("profile {}", user_id)))
    }

    pub fn update_display_name(
        &self,
        user_id: Uuid,
        display_name: &str,
    ) -> Result<(), DanteError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE profiles SET display_name = ?1, updated_at = ?2 WHERE user_id = ?3",
                rusqlite::params![display_name, to_millis(Utc::now()), user_id.to_string()],
            )
            .map_err(storage_err)?;
            Ok(())
        })
    }

    pub fn set_avatar(
        &self,
        user_id: Uuid,
        avatar_url: &str,
        content_type: &str,
    ) -> Result<(), DanteError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE profiles SET avatar_url = ?1, avatar_content_type = ?2, updated_at = ?3
                 WHERE user_id = ?4",
                rusqlite::params![
                    avatar_url,
                    content_type,
                    to_millis(Utc::now()),
                    user_id.to_string()
                ],
            )
            .map_err(storage_err)?;
            Ok(())
        })
    }
}

// ============================================================================
// Chat sessions
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct StoredSession {
    pub id: String,
    pub user_id: Uuid,
    pub title: String,
    pub agent_type: AgentType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of appending an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOutcome {
    /// True if the session row did not exist and was created.
    pub session_created: bool,
    pub message_id: i64,
}

/// Repository for chat sessions and their exchanges.
pub struct SessionRepository {
    db: Arc<Database>,
}

impl SessionRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create an empty session.
    pub fn create(
        &self,
        id: &str,
        user_id: Uuid,
        title: &str,
        agent_type: AgentType,
    ) -> Result<StoredSession, DanteError> {
        let now = Utc::now();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chat_sessions (id, user_id, title, agent_type, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                rusqlite::params![
                    id,
                    user_id.to_string(),
                    title,
                    agent_type.as_str(),
                    to_millis(now)
                ],
            )
            .map_err(|e| DanteError::Storage(format!("Failed to create session: {}", e)))?;
            Ok(())
        })?;

        Ok(StoredSession {
            id: id.to_string(),
            user_id,
            title: title.to_string(),
            agent_type,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn find(&self, id: &str) -> Result<Option<StoredSession>, DanteError> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT user_id, title, agent_type, created_at, updated_at
                     FROM chat_sessions WHERE id = ?1",
                    [id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, i64>(3)?,
                            row.get::<_, i64>(4)?,
                        ))
                    },
                )
                .optional()
                .map_err(storage_err)?;

            match row {
                Some((user_id, title, agent, created_at, updated_at)) => Ok(Some(StoredSession {
                    id: id.to_string(),
                    user_id: parse_uuid(&user_id)?,
                    title,
                    agent_type: AgentType::from_tag(&agent),
                    created_at: from_millis(created_at),
                    updated_at: from_millis(updated_at),
                })),
                None => Ok(None),
            }
        })
    }

    /// Append an exchange, creating the session row if absent.
    ///
    /// A session id owned by a different user is a `Conflict`; the row is
    /// never re-assigned.
    pub fn save_exchange(
        &self,
        session_id: &str,
        user_id: Uuid,
        title: &str,
        agent_type: AgentType,
        exchange: &Exchange,
    ) -> Result<SaveOutcome, DanteError> {
        let now = to_millis(Utc::now());
        self.db.with_tx(|tx| {
            let owner: Option<String> = tx
                .query_row(
                    "SELECT user_id FROM chat_sessions WHERE id = ?1",
                    [session_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(storage_err)?;

            let session_created = match owner {
                Some(owner) if owner != user_id.to_string() => {
                    return Err(DanteError::Conflict(format!(
                        "session {} belongs to another user",
                        session_id
                    )));
                }
                Some(_) => {
                    tx.execute(
                        "UPDATE chat_sessions SET updated_at = ?1 WHERE id = ?2",
                        rusqlite::params![now, session_id],
                    )
                    .map_err(storage_err)?;
                    false
                }
                None => {
                    tx.execute(
                        "INSERT INTO chat_sessions (id, user_id, title, agent_type, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                        rusqlite::params![
                            session_id,
                            user_id.to_string(),
                            title,
                            agent_type.as_str(),
                            now
                        ],
                    )
                    .map_err(|e| DanteError::Storage(format!("Failed to create session: {}", e)))?;
                    true
                }
            };

            tx.execute(
                "INSERT INTO chat_messages (session_id, msg_input, msg_output, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![session_id, exchange.msg_input, exchange.msg_output, now],
            )
            .map_err(|e| DanteError::Storage(format!("Failed to save message: {}", e)))?;

            Ok(SaveOutcome {
                session_created,
                message_id: tx.last_insert_rowid(),
            })
        })
    }

    /// All sessions of a user, most recently updated first, each with its
    /// exchanges in insertion order.
    pub fn list_with_messages(&self, user_id: Uuid) -> Result<Vec<RemoteSession>, DanteError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, title, agent_type, updated_at FROM chat_sessions
                     WHERE user_id = ?1
                     ORDER BY updated_at DESC, created_at DESC",
                )
                .map_err(storage_err)?;

            let rows = stmt
                .query_map([user_id.to_string()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                })
                .map_err(storage_err)?;

            let mut sessions = Vec::new();
            for row in rows {
                let (id, title, agent, updated_at) = row.map_err(storage_err)?;
                sessions.push(RemoteSession {
                    chat_session_id: id,
                    chat_session_title: title,
                    agent_type: AgentType::from_tag(&agent),
                    updated_at: Some(from_millis(updated_at)),
                    messages: Vec::new(),
                });
            }

            let mut msg_stmt = conn
                .prepare(
                    "SELECT msg_input, msg_output FROM chat_messages
                     WHERE session_id = ?1 ORDER BY id ASC",
                )
                .map_err(storage_err)?;

            for session in &mut sessions {
                let rows = msg_stmt
                    .query_map([&session.chat_session_id], |row| {
                        Ok(Exchange {
                            msg_input: row.get(0)?,
                            msg_output: row.get(1)?,
                        })
                    })
                    .map_err(storage_err)?;
                for row in rows {
                    session.messages.push(row.map_err(storage_err)?);
                }
            }

            Ok(sessions)
        })
    }

    /// Rename a session owned by `user_id`. Returns false if no such session.
    pub fn rename(&self, id: &str, user_id: Uuid, title: &str) -> Result<bool, DanteError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE chat_sessions SET title = ?1, updated_at = ?2
                     WHERE id = ?3 AND user_id = ?4",
                    rusqlite::params![title, to_millis(Utc::now()), id, user_id.to_string()],
                )
                .map_err(storage_err)?;
            Ok(changed == 1)
        })
    }

    /// Delete a session owned by `user_id` and its messages.
    pub fn delete(&self, id: &str, user_id: Uuid) -> Result<bool, DanteError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "DELETE FROM chat_sessions WHERE id = ?1 AND user_id = ?2",
                    rusqlite::params![id, user_id.to_string()],
                )
                .map_err(storage_err)?;
            Ok(changed == 1)
        })
    }

    pub fn count_messages(&self, id: &str) -> Result<u64, DanteError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM chat_messages WHERE session_id = ?1",
                    [id],
                    |row| row.get(0),
                )
                .map_err(storage_err)?;
            Ok(count as u64)
        })
    }
}
