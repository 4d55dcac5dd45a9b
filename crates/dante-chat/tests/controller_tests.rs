//! Controller tests against in-memory fakes of the flow engine and backend.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use dante_chat::{
    AuthSession, BackendError, CacheSnapshot, ChatController, ChatError, ControllerOptions,
    FlowEngine, FlowError, LoadState, MemoryStore, MessageStatus, PersistenceSender, RetryPolicy,
    SessionBackend, SessionCache, SessionSummary, SyncStatus, UiState, ViewState, FALLBACK_REPLY,
};
use dante_core::types::{
    AgentType, Exchange, LoadUserDataResponse, RemoteSession, SaveExchangeRequest,
    SaveExchangeResponse,
};

// ============================================================================
// Fakes
// ============================================================================

#[derive(Default)]
struct FakeFlow {
    fail: AtomicBool,
    calls: Mutex<Vec<(String, String, AgentType)>>,
    /// Reply latency per input.
    delays: Mutex<HashMap<String, Duration>>,
}

#[async_trait]
impl FlowEngine for FakeFlow {
    async fn run(
        &self,
        input: &str,
        session_id: &str,
        agent: AgentType,
    ) -> Result<String, FlowError> {
        self.calls
            .lock()
            .unwrap()
            .push((input.to_string(), session_id.to_string(), agent));
        let delay = self.delays.lock().unwrap().get(input).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(FlowError::Status {
                status: 500,
                body: "boom".to_string(),
            });
        }
        Ok(format!("respuesta a: {input}"))
    }
}

#[derive(Default)]
struct FakeBackend {
    sessions: Mutex<Vec<RemoteSession>>,
    load_error: Mutex<Option<BackendError>>,
    saved: Mutex<Vec<SaveExchangeRequest>>,
    /// Session ids whose saves answer 409.
    foreign_ids: Mutex<HashSet<String>>,
    save_error: Mutex<Option<BackendError>>,
    save_delay: Mutex<Option<Duration>>,
    created: Mutex<Vec<String>>,
    renames: Mutex<Vec<(String, String)>>,
    deletes: Mutex<Vec<String>>,
    delete_error: Mutex<Option<BackendError>>,
}

#[async_trait]
impl SessionBackend for FakeBackend {
    async fn create_session(&self, _: &str, _: AgentType) -> Result<String, BackendError> {
        let id = format!("server-{}", self.created.lock().unwrap().len() + 1);
        self.created.lock().unwrap().push(id.clone());
        Ok(id)
    }

    async fn load_user_data(&self, _: &str) -> Result<LoadUserDataResponse, BackendError> {
        if let Some(err) = self.load_error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(LoadUserDataResponse {
            user_id: Uuid::nil(),
            chat_sessions: self.sessions.lock().unwrap().clone(),
        })
    }

    async fn save_exchange(
        &self,
        _: &str,
        request: &SaveExchangeRequest,
    ) -> Result<SaveExchangeResponse, BackendError> {
        let delay = *self.save_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.foreign_ids.lock().unwrap().contains(&request.chat_session_id) {
            return Err(BackendError::Conflict("owned by another user".into()));
        }
        if let Some(err) = self.save_error.lock().unwrap().clone() {
            return Err(err);
        }
        let mut saved = self.saved.lock().unwrap();
        saved.push(request.clone());
        Ok(SaveExchangeResponse {
            chat_session_id: request.chat_session_id.clone(),
            message_id: saved.len() as i64,
        })
    }

    async fn rename_session(
        &self,
        _: &str,
        session_id: &str,
        _: Uuid,
        title: &str,
    ) -> Result<(), BackendError> {
        self.renames
            .lock()
            .unwrap()
            .push((session_id.to_string(), title.to_string()));
        Ok(())
    }

    async fn delete_session(&self, _: &str, session_id: &str, _: Uuid) -> Result<(), BackendError> {
        self.deletes.lock().unwrap().push(session_id.to_string());
        match self.delete_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

struct Harness {
    controller: ChatController,
    flow: Arc<FakeFlow>,
    backend: Arc<FakeBackend>,
    cache: SessionCache,
    user_id: Uuid,
}

fn harness() -> Harness {
    let user_id = Uuid::new_v4();
    let flow = Arc::new(FakeFlow::default());
    let backend = Arc::new(FakeBackend::default());
    let cache = SessionCache::new(Arc::new(MemoryStore::new()));
    let sender = Arc::new(PersistenceSender::new(
        backend.clone(),
        RetryPolicy {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(1),
        },
    ));
    let auth = AuthSession {
        access_token: "access".to_string(),
        user_id,
        email: "ana@notaria.es".to_string(),
        expires_at: Utc::now() + chrono::Duration::hours(1),
    };
    let controller = ChatController::new(
        auth,
        flow.clone(),
        backend.clone(),
        sender,
        cache.clone(),
        ControllerOptions::default(),
    );
    Harness {
        controller,
        flow,
        backend,
        cache,
        user_id,
    }
}

fn remote(id: &str, title: &str, exchanges: usize) -> RemoteSession {
    RemoteSession {
        chat_session_id: id.to_string(),
        chat_session_title: title.to_string(),
        agent_type: AgentType::Registral,
        updated_at: Some(Utc::now()),
        messages: (0..exchanges)
            .map(|i| Exchange {
                msg_input: format!("pregunta {i}"),
                msg_output: format!("respuesta {i}"),
            })
            .collect(),
    }
}

// ============================================================================
// Loading
// ============================================================================

#[tokio::test]
async fn test_load_empty_shows_welcome() {
    let h = harness();
    h.controller.load().await.unwrap();

    let state = h.controller.state();
    assert_eq!(state.view(), &ViewState::Welcome);
    assert_eq!(state.load_state(), &LoadState::Loaded);
    assert!(state.sessions().is_empty());
}

#[tokio::test]
async fn test_load_opens_most_recent_and_caches() {
    let h = harness();
    *h.backend.sessions.lock().unwrap() = vec![remote("s-1", "Hipoteca", 2)];
    h.controller.load().await.unwrap();

    assert_eq!(
        h.controller.state().view(),
        &ViewState::ActiveSession("s-1".into())
    );
    let snapshot = h.cache.load_for(h.user_id).unwrap();
    assert_eq!(snapshot.sessions.len(), 1);
    assert_eq!(snapshot.sessions[0].message_count, 4);
    assert_eq!(snapshot.ui_state.current_session_id.as_deref(), Some("s-1"));
}

#[tokio::test]
async fn test_load_failure_is_reported() {
    let h = harness();
    *h.backend.load_error.lock().unwrap() = Some(BackendError::Unauthorized("expired".into()));

    let err = h.controller.load().await.unwrap_err();
    assert!(err.is_unauthorized());
    let state = h.controller.state();
    assert!(matches!(state.load_state(), LoadState::Failed(_)));
    assert_eq!(state.view(), &ViewState::Welcome);
}

#[tokio::test]
async fn test_cache_restores_then_server_wins() {
    let h = harness();
    h.cache.save(&CacheSnapshot::new(
        h.user_id,
        vec![SessionSummary {
            id: "stale".into(),
            title: "Antigua".into(),
            message_count: 2,
            last_updated: Utc::now(),
        }],
        UiState {
            current_session_id: Some("stale".into()),
            is_welcome_mode: false,
        },
    ));

    assert!(h.controller.restore_from_cache());
    assert_eq!(
        h.controller.state().view(),
        &ViewState::ActiveSession("stale".into())
    );

    *h.backend.sessions.lock().unwrap() = vec![remote("fresh", "Nueva", 1)];
    h.controller.load().await.unwrap();
    let state = h.controller.state();
    assert_eq!(state.view(), &ViewState::ActiveSession("fresh".into()));
    assert!(state.session("stale").is_none());
}

// ============================================================================
// Sending
// ============================================================================

#[tokio::test]
async fn test_first_message_creates_and_persists_session() {
    let h = harness();
    h.controller.load().await.unwrap();

    let outcome = h
        .controller
        .send_message("¿Cómo se inscribe una hipoteca?")
        .await
        .unwrap();
    assert!(!outcome.failed);
    assert_eq!(outcome.reply, "respuesta a: ¿Cómo se inscribe una hipoteca?");

    h.controller.flush().await;

    let saved = h.backend.saved.lock().unwrap().clone();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].chat_session_id, outcome.session_id);
    assert_eq!(saved[0].chat_session_title, "¿Cómo se inscribe una hipoteca?");
    assert_eq!(saved[0].user_id, h.user_id);

    let state = h.controller.state();
    assert!(state.pending().is_empty());
    let session = state.active_session().unwrap();
    assert_eq!(session.messages.len(), 2);
    assert_eq!(session.messages[0].sync, Some(SyncStatus::Sent));
    assert_eq!(session.messages[1].status, MessageStatus::Complete);
}

#[tokio::test]
async fn test_flow_failure_shows_one_fallback_and_saves_nothing() {
    let h = harness();
    h.controller.load().await.unwrap();
    h.flow.fail.store(true, Ordering::SeqCst);

    let outcome = h.controller.send_message("hola").await.unwrap();
    assert!(outcome.failed);
    assert_eq!(outcome.reply, FALLBACK_REPLY);

    h.controller.flush().await;
    assert!(h.backend.saved.lock().unwrap().is_empty());

    let state = h.controller.state();
    let messages = &state.active_session().unwrap().messages;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].status, MessageStatus::Error);
    assert_eq!(
        messages.iter().filter(|m| m.content == FALLBACK_REPLY).count(),
        1
    );
}

#[tokio::test]
async fn test_blank_message_is_rejected() {
    let h = harness();
    let err = h.controller.send_message("   ").await.unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));
    assert!(h.flow.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_agent_is_passed_to_flow() {
    let h = harness();
    h.controller.load().await.unwrap();
    h.controller
        .send_message_as("escritura de compraventa", AgentType::Notarial)
        .await
        .unwrap();
    let calls = h.flow.calls.lock().unwrap().clone();
    assert_eq!(calls[0].2, AgentType::Notarial);
}

#[tokio::test]
async fn test_conflict_on_first_save_moves_to_server_id() {
    let h = harness();
    h.controller.load().await.unwrap();

    let outcome = h.controller.send_message("Consulta registral").await.unwrap();
    let provisional = outcome.session_id.clone();
    // The save task has not run yet on the single-threaded test runtime.
    h.backend.foreign_ids.lock().unwrap().insert(provisional.clone());
    h.controller.flush().await;

    let state = h.controller.state();
    let saved = h.backend.saved.lock().unwrap().clone();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].chat_session_id, "server-1");
    assert_eq!(state.view(), &ViewState::ActiveSession("server-1".into()));
    assert_eq!(state.resolve_id(&provisional), "server-1");
    assert!(state.pending().is_empty());
    assert_eq!(
        h.backend.renames.lock().unwrap().clone(),
        vec![("server-1".to_string(), "Consulta registral".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_sends_to_one_session_keep_order() {
    let h = harness();
    *h.backend.sessions.lock().unwrap() = vec![remote("s-1", "Hipoteca", 0)];
    h.controller.load().await.unwrap();
    {
        let mut delays = h.flow.delays.lock().unwrap();
        delays.insert("primera".to_string(), Duration::from_millis(200));
        delays.insert("segunda".to_string(), Duration::from_millis(10));
    }

    let (first, second) = tokio::join!(
        h.controller.send_message("primera"),
        h.controller.send_message("segunda")
    );
    first.unwrap();
    second.unwrap();
    h.controller.flush().await;

    let saved: Vec<_> = h
        .backend
        .saved
        .lock()
        .unwrap()
        .iter()
        .map(|r| r.msg_input.clone())
        .collect();
    assert_eq!(saved, ["primera", "segunda"]);

    let state = h.controller.state();
    let contents: Vec<_> = state
        .session("s-1")
        .unwrap()
        .messages
        .iter()
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(
        contents,
        [
            "primera",
            "respuesta a: primera",
            "segunda",
            "respuesta a: segunda"
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_reload_during_send_keeps_new_exchange() {
    let h = harness();
    h.cache.save(&CacheSnapshot::new(
        h.user_id,
        vec![SessionSummary {
            id: "s".into(),
            title: "S".into(),
            message_count: 6,
            last_updated: Utc::now(),
        }],
        UiState {
            current_session_id: Some("s".into()),
            is_welcome_mode: false,
        },
    ));
    assert!(h.controller.restore_from_cache());
    *h.backend.sessions.lock().unwrap() = vec![remote("s", "S", 3)];
    h.flow
        .delays
        .lock()
        .unwrap()
        .insert("nueva".to_string(), Duration::from_millis(100));

    let (sent, loaded) = tokio::join!(h.controller.send_message("nueva"), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.controller.load().await
    });
    assert_eq!(sent.unwrap().reply, "respuesta a: nueva");
    loaded.unwrap();

    let state = h.controller.state();
    let messages = &state.session("s").unwrap().messages;
    assert_eq!(messages.len(), 8);
    assert_eq!(messages[6].content, "nueva");
    assert_eq!(messages[7].content, "respuesta a: nueva");
    assert_eq!(messages[7].status, MessageStatus::Complete);
}

// ============================================================================
// Session management
// ============================================================================

#[tokio::test]
async fn test_new_chat_then_select() {
    let h = harness();
    *h.backend.sessions.lock().unwrap() = vec![remote("a", "A", 1), remote("b", "B", 1)];
    h.controller.load().await.unwrap();

    h.controller.new_chat();
    assert_eq!(h.controller.state().view(), &ViewState::Welcome);
    assert!(h.cache.load().unwrap().ui_state.is_welcome_mode);

    h.controller.select_session("b").unwrap();
    assert_eq!(
        h.controller.state().view(),
        &ViewState::ActiveSession("b".into())
    );
    assert!(matches!(
        h.controller.select_session("zzz").unwrap_err(),
        ChatError::SessionNotFound(_)
    ));
}

#[tokio::test]
async fn test_rename_stored_session_calls_server() {
    let h = harness();
    *h.backend.sessions.lock().unwrap() = vec![remote("a", "A", 1)];
    h.controller.load().await.unwrap();

    h.controller.rename_session("a", "  Herencia  ").await.unwrap();
    assert_eq!(h.controller.state().session("a").unwrap().title, "Herencia");
    assert_eq!(
        h.backend.renames.lock().unwrap().clone(),
        vec![("a".to_string(), "Herencia".to_string())]
    );

    let err = h
        .controller
        .rename_session("a", &"x".repeat(101))
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));
}

#[tokio::test]
async fn test_rename_unsaved_session_is_local() {
    let h = harness();
    h.controller.load().await.unwrap();
    *h.backend.save_error.lock().unwrap() = Some(BackendError::Rejected("nope".into()));

    let outcome = h.controller.send_message("hola").await.unwrap();
    h.controller.flush().await;
    assert!(h.controller.state().pending().is_provisional(&outcome.session_id));

    h.controller
        .rename_session(&outcome.session_id, "Local")
        .await
        .unwrap();
    assert!(h.backend.renames.lock().unwrap().is_empty());
    assert_eq!(
        h.controller.state().session(&outcome.session_id).unwrap().title,
        "Local"
    );
}

#[tokio::test(start_paused = true)]
async fn test_rename_during_first_save_reaches_server() {
    let h = harness();
    h.controller.load().await.unwrap();
    *h.backend.save_delay.lock().unwrap() = Some(Duration::from_millis(50));

    let outcome = h.controller.send_message("hola").await.unwrap();
    // The save is now in flight with the derived title.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(h.controller.state().pending().is_provisional(&outcome.session_id));

    h.controller
        .rename_session(&outcome.session_id, "Herencia")
        .await
        .unwrap();
    assert!(h.backend.renames.lock().unwrap().is_empty());

    h.controller.flush().await;
    assert_eq!(h.backend.saved.lock().unwrap()[0].chat_session_title, "hola");
    assert_eq!(
        h.backend.renames.lock().unwrap().clone(),
        vec![(outcome.session_id.clone(), "Herencia".to_string())]
    );
    assert!(h.controller.state().pending().is_empty());
}

#[tokio::test]
async fn test_delete_active_session_returns_to_welcome() {
    let h = harness();
    *h.backend.sessions.lock().unwrap() = vec![remote("a", "A", 1), remote("b", "B", 1)];
    h.controller.load().await.unwrap();
    let active = match h.controller.state().view() {
        ViewState::ActiveSession(id) => id.clone(),
        other => panic!("unexpected view {other:?}"),
    };

    h.controller.delete_session(&active).await.unwrap();
    let state = h.controller.state();
    assert_eq!(state.view(), &ViewState::Welcome);
    assert_eq!(state.sessions().len(), 1);
    assert_eq!(h.backend.deletes.lock().unwrap().clone(), vec![active]);
}

#[tokio::test]
async fn test_delete_tolerates_missing_server_row() {
    let h = harness();
    *h.backend.sessions.lock().unwrap() = vec![remote("a", "A", 1)];
    h.controller.load().await.unwrap();
    *h.backend.delete_error.lock().unwrap() = Some(BackendError::NotFound("gone".into()));

    h.controller.delete_session("a").await.unwrap();
    assert!(h.controller.state().sessions().is_empty());

    assert!(matches!(
        h.controller.delete_session("a").await.unwrap_err(),
        ChatError::SessionNotFound(_)
    ));
}
