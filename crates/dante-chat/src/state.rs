//! Session-list / welcome state machine.
//!
//! [`ChatState`] is the single application state object of the chat front
//! end: the session list, the view (loading, welcome screen or one active
//! session), the forced-welcome flag and the table of sessions whose ids
//! the server has not acknowledged yet.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use dante_core::types::{AgentType, LoadUserDataResponse, RemoteSession};
use dante_core::validation::derive_title;

use crate::cache::{CacheSnapshot, SessionSummary, UiState};
use crate::sender::SyncStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewState {
    /// Waiting for the first session list.
    Loading,
    /// Empty conversation screen; the next message starts a new session.
    Welcome,
    ActiveSession(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    /// Placeholder shown while the flow engine is working.
    Loading,
    Complete,
    /// Fallback text shown after a failed flow call.
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub status: MessageStatus,
    /// Persistence status; only set on user messages of this process.
    pub sync: Option<SyncStatus>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    fn new(role: Role, content: impl Into<String>, status: MessageStatus) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            status,
            sync: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    pub agent_type: AgentType,
    pub messages: Vec<ChatMessage>,
    pub updated_at: DateTime<Utc>,
    /// False for sessions restored from the cache, whose bodies are not
    /// known until the server list arrives.
    pub messages_loaded: bool,
    cached_message_count: usize,
}

impl ChatSession {
    fn new(id: String, title: String, agent_type: AgentType) -> Self {
        Self {
            id,
            title,
            agent_type,
            messages: Vec::new(),
            updated_at: Utc::now(),
            messages_loaded: true,
            cached_message_count: 0,
        }
    }

    /// Rebuild the message list by interleaving the stored exchanges.
    fn from_remote(remote: RemoteSession) -> Self {
        let mut messages = Vec::with_capacity(remote.messages.len() * 2);
        for exchange in remote.messages {
            let mut user = ChatMessage::new(Role::User, exchange.msg_input, MessageStatus::Complete);
            user.sync = Some(SyncStatus::Sent);
            messages.push(user);
            messages.push(ChatMessage::new(
                Role::Assistant,
                exchange.msg_output,
                MessageStatus::Complete,
            ));
        }
        Self {
            id: remote.chat_session_id,
            title: remote.chat_session_title,
            agent_type: remote.agent_type,
            cached_message_count: messages.len(),
            messages,
            updated_at: remote.updated_at.unwrap_or_else(Utc::now),
            messages_loaded: true,
        }
    }

    fn from_summary(summary: &SessionSummary) -> Self {
        Self {
            id: summary.id.clone(),
            title: summary.title.clone(),
            agent_type: AgentType::default(),
            messages: Vec::new(),
            updated_at: summary.last_updated,
            messages_loaded: false,
            cached_message_count: summary.message_count,
        }
    }

    pub fn message_count(&self) -> usize {
        if self.messages_loaded {
            self.messages.len()
        } else {
            self.cached_message_count
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            message_count: self.message_count(),
            last_updated: self.updated_at,
        }
    }
}

/// Whether the authoritative session list has arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    NotLoaded,
    /// Loaded; the list may legitimately be empty.
    Loaded,
    Failed(String),
}

/// Client-generated session ids the server has not acknowledged yet, plus
/// the ids that were replaced after a conflict.
#[derive(Debug, Clone, Default)]
pub struct PendingSessions {
    provisional: HashSet<String>,
    rekeyed: HashMap<String, String>,
}

impl PendingSessions {
    pub fn mark(&mut self, id: &str) {
        self.provisional.insert(id.to_string());
    }

    pub fn is_provisional(&self, id: &str) -> bool {
        self.provisional.contains(id)
    }

    pub fn acknowledge(&mut self, id: &str) {
        self.provisional.remove(id);
    }

    pub fn len(&self) -> usize {
        self.provisional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.provisional.is_empty()
    }

    fn rekey(&mut self, old: &str, new: &str) {
        if self.provisional.remove(old) {
            self.provisional.insert(new.to_string());
        }
        self.rekeyed.insert(old.to_string(), new.to_string());
    }

    /// Follow replacements to the current id.
    pub fn resolve(&self, id: &str) -> String {
        let mut current = id;
        for _ in 0..=self.rekeyed.len() {
            match self.rekeyed.get(current) {
                Some(next) => current = next,
                None => break,
            }
        }
        current.to_string()
    }
}

/// Ids of one in-flight exchange, returned by [`ChatState::begin_exchange`].
#[derive(Debug, Clone, PartialEq)]
pub struct PendingExchange {
    pub session_id: String,
    pub user_message_id: String,
    pub placeholder_id: String,
    pub agent_type: AgentType,
    /// True if this exchange created the session.
    pub created_session: bool,
}

#[derive(Debug, Clone)]
pub struct ChatState {
    pub user_id: Uuid,
    /// Keep the welcome screen even when sessions exist. Set by "new chat"
    /// and by deleting the active session; cleared by selecting a session.
    pub force_welcome: bool,
    view: ViewState,
    sessions: Vec<ChatSession>,
    load: LoadState,
    pending: PendingSessions,
}

impl ChatState {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            force_welcome: false,
            view: ViewState::Loading,
            sessions: Vec::new(),
            load: LoadState::NotLoaded,
            pending: PendingSessions::default(),
        }
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    /// Sessions, most recently updated first.
    pub fn sessions(&self) -> &[ChatSession] {
        &self.sessions
    }

    pub fn load_state(&self) -> &LoadState {
        &self.load
    }

    pub fn pending(&self) -> &PendingSessions {
        &self.pending
    }

    pub fn session(&self, id: &str) -> Option<&ChatSession> {
        self.sessions.iter().find(|s| s.id == id)
    }

    fn session_mut(&mut self, id: &str) -> Option<&mut ChatSession> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    pub fn active_session(&self) -> Option<&ChatSession> {
        match &self.view {
            ViewState::ActiveSession(id) => self.session(id),
            _ => None,
        }
    }

    fn sort_sessions(&mut self) {
        self.sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    }

    /// Force `Welcome` when the view names no session or an unknown one.
    pub fn normalize(&mut self) {
        if let ViewState::ActiveSession(id) = &self.view {
            if id.is_empty() || self.session(id).is_none() {
                self.view = ViewState::Welcome;
            }
        }
    }

    /// Paint the cached session list while the server list is in flight.
    /// Ignored once the server list has been applied.
    pub fn apply_snapshot(&mut self, snapshot: &CacheSnapshot) {
        if self.load == LoadState::Loaded || snapshot.user_id != self.user_id {
            return;
        }
        self.sessions = snapshot
            .sessions
            .iter()
            .map(ChatSession::from_summary)
            .collect();
        self.sort_sessions();

        let ui = &snapshot.ui_state;
        if ui.is_welcome_mode {
            self.view = ViewState::Welcome;
            self.force_welcome = true;
        } else if let Some(id) = &ui.current_session_id {
            self.view = ViewState::ActiveSession(id.clone());
        }
        self.normalize();
    }

    /// Replace the session list with the server's.
    ///
    /// Sessions still provisional locally are kept. Exchanges the server
    /// has not stored yet are appended after the server's messages.
    pub fn apply_remote(&mut self, data: LoadUserDataResponse) {
        let mut local: HashMap<String, ChatSession> = std::mem::take(&mut self.sessions)
            .into_iter()
            .map(|s| (s.id.clone(), s))
            .collect();

        let mut merged = Vec::with_capacity(data.chat_sessions.len());
        for remote in data.chat_sessions {
            let mut session = ChatSession::from_remote(remote);
            if let Some(mine) = local.remove(&session.id) {
                let unsaved = unsaved_exchanges(mine.messages);
                if !unsaved.is_empty() {
                    session.messages.extend(unsaved);
                    session.updated_at = session.updated_at.max(mine.updated_at);
                }
            }
            merged.push(session);
        }
        merged.extend(
            local
                .into_values()
                .filter(|s| self.pending.is_provisional(&s.id)),
        );

        self.sessions = merged;
        self.sort_sessions();
        self.load = LoadState::Loaded;

        let keep_current = matches!(&self.view, ViewState::ActiveSession(id) if self.session(id).is_some());
        if self.force_welcome {
            self.view = ViewState::Welcome;
        } else if !keep_current {
            self.view = match self.sessions.first() {
                Some(s) => ViewState::ActiveSession(s.id.clone()),
                None => ViewState::Welcome,
            };
        }
    }

    /// Record a failed server load. A loading view falls back to welcome.
    pub fn mark_load_failed(&mut self, reason: impl Into<String>) {
        self.load = LoadState::Failed(reason.into());
        if self.view == ViewState::Loading {
            self.view = ViewState::Welcome;
        }
        self.normalize();
    }

    pub fn new_chat(&mut self) {
        self.view = ViewState::Welcome;
        self.force_welcome = true;
    }

    /// Make `id` the active session. Returns false if it is unknown.
    pub fn select(&mut self, id: &str) -> bool {
        if self.session(id).is_none() {
            return false;
        }
        self.view = ViewState::ActiveSession(id.to_string());
        self.force_welcome = false;
        true
    }

    /// Append the user message and a loading placeholder.
    ///
    /// Outside an active session a new session is created client-side with
    /// a provisional id and becomes active before the server knows it.
    pub fn begin_exchange(
        &mut self,
        text: &str,
        agent: AgentType,
        title_max_chars: usize,
    ) -> PendingExchange {
        let existing = self.active_session().map(|s| s.id.clone());
        let created_session = existing.is_none();
        let session_id = match existing {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                let session =
                    ChatSession::new(id.clone(), derive_title(text, title_max_chars), agent);
                self.sessions.insert(0, session);
                self.pending.mark(&id);
                self.view = ViewState::ActiveSession(id.clone());
                self.force_welcome = false;
                id
            }
        };

        let user = ChatMessage::new(Role::User, text, MessageStatus::Complete);
        let placeholder = ChatMessage::new(Role::Assistant, "", MessageStatus::Loading);
        let pending = PendingExchange {
            session_id: session_id.clone(),
            user_message_id: user.id.clone(),
            placeholder_id: placeholder.id.clone(),
            agent_type: agent,
            created_session,
        };

        if let Some(session) = self.session_mut(&session_id) {
            session.messages.push(user);
            session.messages.push(placeholder);
            session.messages_loaded = true;
            session.updated_at = Utc::now();
        }
        if let Some(session) = self.session(&session_id) {
            // Sessions restored from the cache keep their own agent.
            let agent_type = session.agent_type;
            self.sort_sessions();
            return PendingExchange {
                agent_type,
                ..pending
            };
        }
        pending
    }

    /// Replace the placeholder of an exchange. Returns false if the session
    /// or placeholder is gone.
    pub fn finish_exchange(
        &mut self,
        session_id: &str,
        placeholder_id: &str,
        content: String,
        status: MessageStatus,
    ) -> bool {
        let id = self.pending.resolve(session_id);
        let Some(message) = self
            .session_mut(&id)
            .and_then(|s| s.messages.iter_mut().find(|m| m.id == placeholder_id))
        else {
            return false;
        };
        message.content = content;
        message.status = status;
        true
    }

    pub fn set_sync(&mut self, message_id: &str, status: SyncStatus) {
        if let Some(message) = self
            .sessions
            .iter_mut()
            .flat_map(|s| s.messages.iter_mut())
            .find(|m| m.id == message_id)
        {
            message.sync = Some(status);
        }
    }

    pub fn rename(&mut self, id: &str, title: &str) -> bool {
        match self.session_mut(id) {
            Some(session) => {
                session.title = title.to_string();
                true
            }
            None => false,
        }
    }

    /// Remove a session. Removing the active one shows the welcome screen.
    pub fn remove(&mut self, id: &str) -> Option<ChatSession> {
        let index = self.sessions.iter().position(|s| s.id == id)?;
        let removed = self.sessions.remove(index);
        self.pending.acknowledge(id);
        if self.view == ViewState::ActiveSession(id.to_string()) {
            self.view = ViewState::Welcome;
            self.force_welcome = true;
        }
        self.normalize();
        Some(removed)
    }

    /// Replace a provisional id the server rejected.
    pub fn rekey(&mut self, old: &str, new: &str) {
        if let Some(session) = self.session_mut(old) {
            session.id = new.to_string();
        }
        if self.view == ViewState::ActiveSession(old.to_string()) {
            self.view = ViewState::ActiveSession(new.to_string());
        }
        self.pending.rekey(old, new);
    }

    pub fn acknowledge(&mut self, id: &str) {
        self.pending.acknowledge(id);
    }

    pub fn resolve_id(&self, id: &str) -> String {
        self.pending.resolve(id)
    }

    pub fn ui_state(&self) -> UiState {
        match &self.view {
            ViewState::ActiveSession(id) => UiState {
                current_session_id: Some(id.clone()),
                is_welcome_mode: false,
            },
            _ => UiState {
                current_session_id: None,
                is_welcome_mode: true,
            },
        }
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot::new(
            self.user_id,
            self.sessions.iter().map(ChatSession::summary).collect(),
            self.ui_state(),
        )
    }
}

/// Messages of exchanges whose user message is not confirmed stored,
/// in order. Replies follow their user message.
fn unsaved_exchanges(messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    let mut keep = false;
    messages
        .into_iter()
        .filter(|m| {
            if m.role == Role::User {
                keep = m.sync != Some(SyncStatus::Sent);
            }
            keep
        })
        .collect()
}
