//! Chat controller.
//!
//! Drives [`ChatState`] from user actions: loads the session list, sends
//! utterances to the flow engine, hands completed exchanges to the
//! persistence sender and keeps the cache snapshot current.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use dante_core::config::ChatConfig;
use dante_core::types::{AgentType, SaveExchangeRequest};
use dante_core::validation::{validate_title, ValidationError, DEFAULT_TITLE};

use crate::auth::AuthSession;
use crate::backend::SessionBackend;
use crate::cache::SessionCache;
use crate::error::{BackendError, ChatError};
use crate::flow::FlowEngine;
use crate::sender::{Delivery, PersistenceSender, StatusCallback, SyncStatus};
use crate::state::{ChatState, MessageStatus, PendingExchange};

/// Reply shown in place of a failed flow call.
pub const FALLBACK_REPLY: &str =
    "Lo siento, ocurrió un error temporal. Por favor, inténtalo de nuevo.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerOptions {
    pub title_max_chars: usize,
    /// Agent of sessions started from the welcome screen.
    pub default_agent: AgentType,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self::from(&ChatConfig::default())
    }
}

impl From<&ChatConfig> for ControllerOptions {
    fn from(config: &ChatConfig) -> Self {
        Self {
            title_max_chars: config.title_max_chars,
            default_agent: AgentType::default(),
        }
    }
}

/// Result of one send.
#[derive(Debug, Clone, PartialEq)]
pub struct SendOutcome {
    pub session_id: String,
    pub reply: String,
    /// True when the flow call failed and `reply` is the fallback.
    pub failed: bool,
}

/// Per-session chain of sends. Each send waits for the one queued before it
/// in the same session, so flow calls and saves keep send order.
#[derive(Default)]
struct SendQueues {
    next_seq: u64,
    /// Latest queued send of each session.
    tails: HashMap<String, (u64, oneshot::Receiver<()>)>,
}

impl SendQueues {
    /// Queue a send on `session_id`. Returns its sequence number, the signal
    /// the next send waits on and the signal of the previous send.
    fn enqueue(
        &mut self,
        session_id: &str,
    ) -> (u64, oneshot::Sender<()>, Option<oneshot::Receiver<()>>) {
        self.next_seq += 1;
        let seq = self.next_seq;
        let (done_tx, done_rx) = oneshot::channel();
        let previous = self
            .tails
            .insert(session_id.to_string(), (seq, done_rx))
            .map(|(_, rx)| rx);
        (seq, done_tx, previous)
    }

    fn rekey(&mut self, old: &str, new: &str) {
        if let Some(tail) = self.tails.remove(old) {
            self.tails.insert(new.to_string(), tail);
        }
    }

    fn release(&mut self, seq: u64) {
        self.tails.retain(|_, (tail_seq, _)| *tail_seq != seq);
    }
}

/// A send's place in its session queue. Dropping it lets the next send run.
struct SendTurn {
    queues: Arc<Mutex<SendQueues>>,
    seq: u64,
    _done: oneshot::Sender<()>,
}

impl Drop for SendTurn {
    fn drop(&mut self) {
        self.queues
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .release(self.seq);
    }
}

/// Handle to the chat of one signed-in user. Clones share state.
#[derive(Clone)]
pub struct ChatController {
    state: Arc<Mutex<ChatState>>,
    auth: AuthSession,
    flow: Arc<dyn FlowEngine>,
    backend: Arc<dyn SessionBackend>,
    sender: Arc<PersistenceSender>,
    cache: SessionCache,
    options: ControllerOptions,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    /// Locked after `state` when both are held.
    queues: Arc<Mutex<SendQueues>>,
}

impl ChatController {
    pub fn new(
        auth: AuthSession,
        flow: Arc<dyn FlowEngine>,
        backend: Arc<dyn SessionBackend>,
        sender: Arc<PersistenceSender>,
        cache: SessionCache,
        options: ControllerOptions,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(ChatState::new(auth.user_id))),
            auth,
            flow,
            backend,
            sender,
            cache,
            options,
            tasks: Arc::new(Mutex::new(Vec::new())),
            queues: Arc::new(Mutex::new(SendQueues::default())),
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.auth.user_id
    }

    /// Copy of the current state.
    pub fn state(&self) -> ChatState {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, ChatState> {
        // State stays consistent between method calls, so a poisoned lock
        // is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn queues(&self) -> MutexGuard<'_, SendQueues> {
        self.queues.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn save_cache(&self) {
        let snapshot = self.lock().snapshot();
        self.cache.save(&snapshot);
    }

    /// Paint the cached session list. Returns true if a snapshot was used.
    pub fn restore_from_cache(&self) -> bool {
        match self.cache.load_for(self.auth.user_id) {
            Some(snapshot) => {
                self.lock().apply_snapshot(&snapshot);
                debug!(sessions = snapshot.sessions.len(), "Restored session list from cache");
                true
            }
            None => false,
        }
    }

    /// Fetch the authoritative session list.
    pub async fn load(&self) -> Result<(), ChatError> {
        match self.backend.load_user_data(&self.auth.access_token).await {
            Ok(data) => {
                let count = data.chat_sessions.len();
                self.lock().apply_remote(data);
                self.save_cache();
                info!(user_id = %self.auth.user_id, sessions = count, "Sessions loaded");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Failed to load sessions");
                self.lock().mark_load_failed(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Send with the default agent.
    pub async fn send_message(&self, text: &str) -> Result<SendOutcome, ChatError> {
        self.send_message_as(text, self.options.default_agent).await
    }

    /// Send one utterance. `agent` only applies if a new session starts.
    ///
    /// A failed flow call leaves one fallback reply and stores nothing. A
    /// successful one is persisted in the background. Sends to one session
    /// run in order: each waits until the previous one is stored.
    pub async fn send_message_as(
        &self,
        text: &str,
        agent: AgentType,
    ) -> Result<SendOutcome, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyMessage.into());
        }

        let (pending, turn, previous) = {
            let mut state = self.lock();
            let pending = state.begin_exchange(text, agent, self.options.title_max_chars);
            let (seq, done, previous) = self.queues().enqueue(&pending.session_id);
            let turn = SendTurn {
                queues: Arc::clone(&self.queues),
                seq,
                _done: done,
            };
            (pending, turn, previous)
        };
        self.save_cache();
        if pending.created_session {
            debug!(session_id = %pending.session_id, agent = %pending.agent_type, "Started session");
        }
        if let Some(previous) = previous {
            // Resolves when the previous send drops its turn.
            let _ = previous.await;
        }

        // The previous send may have re-keyed the session.
        let flow_session_id = self.lock().resolve_id(&pending.session_id);
        let result = self
            .flow
            .run(text, &flow_session_id, pending.agent_type)
            .await;

        let (reply, failed) = match result {
            Ok(reply) => (reply, false),
            Err(e) => {
                warn!(error = %e, session_id = %flow_session_id, "Flow call failed");
                (FALLBACK_REPLY.to_string(), true)
            }
        };
        let status = if failed {
            MessageStatus::Error
        } else {
            MessageStatus::Complete
        };
        let session_id = {
            let mut state = self.lock();
            state.finish_exchange(
                &pending.session_id,
                &pending.placeholder_id,
                reply.clone(),
                status,
            );
            state.resolve_id(&pending.session_id)
        };
        self.save_cache();

        if !failed {
            self.spawn_persist(pending, text.to_string(), reply.clone(), turn);
        }

        Ok(SendOutcome {
            session_id,
            reply,
            failed,
        })
    }

    fn spawn_persist(
        &self,
        pending: PendingExchange,
        input: String,
        output: String,
        turn: SendTurn,
    ) {
        let controller = self.clone();
        let handle = tokio::spawn(async move {
            controller.persist(pending, input, output).await;
            drop(turn);
        });
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    fn status_callback(&self) -> StatusCallback {
        let state = Arc::clone(&self.state);
        Arc::new(move |message_id: &str, status: SyncStatus| {
            state
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .set_sync(message_id, status);
        })
    }

    /// Store one exchange. A conflict on a provisional id gets the session
    /// a fresh server id and sends again once.
    async fn persist(&self, pending: PendingExchange, input: String, output: String) {
        let on_status = self.status_callback();
        let mut rekeyed = false;

        loop {
            let (session_id, title, provisional) = {
                let state = self.lock();
                let id = state.resolve_id(&pending.session_id);
                let provisional = state.pending().is_provisional(&id);
                match state.session(&id) {
                    Some(session) => (id, session.title.clone(), provisional),
                    None => {
                        debug!(session_id = %id, "Session removed before save");
                        return;
                    }
                }
            };

            let delivery = Delivery {
                message_id: pending.user_message_id.clone(),
                access_token: self.auth.access_token.clone(),
                request: SaveExchangeRequest {
                    chat_session_id: session_id.clone(),
                    chat_session_title: title.clone(),
                    msg_input: input.clone(),
                    msg_output: output.clone(),
                    user_id: self.auth.user_id,
                    agent_type: pending.agent_type,
                },
            };

            match self.sender.deliver(&delivery, &on_status).await {
                Ok(_) => {
                    let current_title = {
                        let mut state = self.lock();
                        state.acknowledge(&session_id);
                        state.session(&session_id).map(|s| s.title.clone())
                    };
                    self.save_cache();
                    // A rename made while the save was in flight stayed local.
                    if let Some(current) = current_title.filter(|t| provisional && *t != title) {
                        self.push_title(&session_id, &current).await;
                    }
                    return;
                }
                Err(e) if e.is_conflict() => {
                    // Another exchange may already have re-keyed the session.
                    if self.lock().resolve_id(&session_id) != session_id {
                        continue;
                    }
                    if rekeyed || !self.lock().pending().is_provisional(&session_id) {
                        return;
                    }
                    rekeyed = true;
                    if let Err(e) = self.rekey(&session_id, &title, pending.agent_type).await {
                        warn!(error = %e, session_id = %session_id, "Could not re-key session");
                        return;
                    }
                }
                Err(_) => return,
            }
        }
    }

    /// Replace a rejected provisional id with one allocated by the server.
    async fn rekey(&self, old_id: &str, title: &str, agent: AgentType) -> Result<(), BackendError> {
        let new_id = self
            .backend
            .create_session(&self.auth.access_token, agent)
            .await?;
        {
            let mut state = self.lock();
            state.rekey(old_id, &new_id);
            self.queues().rekey(old_id, &new_id);
        }
        info!(old_id = %old_id, new_id = %new_id, "Session re-keyed after conflict");

        // The new row carries the default title.
        if title != DEFAULT_TITLE {
            self.push_title(&new_id, title).await;
        }
        Ok(())
    }

    /// Best-effort server rename.
    async fn push_title(&self, session_id: &str, title: &str) {
        if let Err(e) = self
            .backend
            .rename_session(&self.auth.access_token, session_id, self.auth.user_id, title)
            .await
        {
            warn!(error = %e, session_id = %session_id, "Could not store session title");
        }
    }

    /// Show the welcome screen.
    pub fn new_chat(&self) {
        self.lock().new_chat();
        self.save_cache();
    }

    pub fn select_session(&self, session_id: &str) -> Result<(), ChatError> {
        if !self.lock().select(session_id) {
            return Err(ChatError::SessionNotFound(session_id.to_string()));
        }
        self.save_cache();
        Ok(())
    }

    /// Rename a session. Sessions the server has not seen yet are renamed
    /// locally; their first save carries the title, or a rename follows the
    /// save if it was already in flight.
    pub async fn rename_session(&self, session_id: &str, title: &str) -> Result<(), ChatError> {
        let title = title.trim();
        validate_title(title)?;

        let (id, provisional) = {
            let mut state = self.lock();
            let id = state.resolve_id(session_id);
            if state.session(&id).is_none() {
                return Err(ChatError::SessionNotFound(session_id.to_string()));
            }
            // Renamed under the same lock the save acknowledgement takes.
            let provisional = state.pending().is_provisional(&id);
            if provisional {
                state.rename(&id, title);
            }
            (id, provisional)
        };

        if !provisional {
            self.backend
                .rename_session(&self.auth.access_token, &id, self.auth.user_id, title)
                .await?;
            self.lock().rename(&id, title);
        }
        self.save_cache();
        info!(session_id = %id, "Session renamed");
        Ok(())
    }

    /// Delete a session locally, then on the server. A session the server
    /// never stored is not an error.
    pub async fn delete_session(&self, session_id: &str) -> Result<(), ChatError> {
        let id = self.lock().resolve_id(session_id);
        if self.lock().remove(&id).is_none() {
            return Err(ChatError::SessionNotFound(session_id.to_string()));
        }
        self.save_cache();

        match self
            .backend
            .delete_session(&self.auth.access_token, &id, self.auth.user_id)
            .await
        {
            Ok(()) | Err(BackendError::NotFound(_)) => {
                info!(session_id = %id, "Session deleted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Wait for every background save started so far.
    pub async fn flush(&self) {
        let handles: Vec<_> = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.drain(..).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Persistence task failed");
            }
        }
    }
}
