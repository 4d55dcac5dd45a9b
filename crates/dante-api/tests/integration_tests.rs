//! Integration tests for the Dante backend API.
//!
//! Each test builds its own router over an in-memory database, a memory
//! mailer and a temporary avatar directory, then drives it with `oneshot`.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use dante_api::handlers::HealthResponse;
use dante_api::{create_router, AppState, MailKind, MemoryMailer};
use dante_core::config::DanteConfig;
use dante_core::types::{
    CreateSessionResponse, LoadUserDataResponse, Profile, SaveExchangeResponse, SignUpResponse,
    TokenResponse,
};
use dante_storage::Database;

// =============================================================================
// Helpers
// =============================================================================

const API_KEY: &str = "test-public-key";

struct TestApp {
    state: AppState,
    mailer: Arc<MemoryMailer>,
    _dir: tempfile::TempDir,
}

impl TestApp {
    fn new() -> Self {
        Self::with_config(|_| {})
    }

    fn with_config(tweak: impl FnOnce(&mut DanteConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DanteConfig::default();
        config.server.public_key = API_KEY.to_string();
        config.server.public_url = "http://dante.test".to_string();
        config.server.rate_limit_per_sec = 0;
        config.general.data_dir = dir.path().to_string_lossy().to_string();
        tweak(&mut config);

        let mailer = Arc::new(MemoryMailer::new());
        let mut state = AppState::new(config, Database::in_memory().unwrap(), mailer.clone());
        state.password_cost = 4;
        Self {
            state,
            mailer,
            _dir: dir,
        }
    }

    fn router(&self) -> axum::Router {
        create_router(self.state.clone())
    }

    async fn send(&self, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let resp = self.router().oneshot(req).await.unwrap();
        let status = resp.status();
        (status, body_bytes(resp).await)
    }

    async fn send_json(&self, req: Request<Body>) -> (StatusCode, Value) {
        let (status, bytes) = self.send(req).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    /// Sign up, confirm through the mailed link and sign in.
    async fn signed_in(&self, email: &str) -> TokenResponse {
        let (status, _) = self
            .send_json(keyed_json(
                "POST",
                "/auth/v1/signup",
                json!({"email": email, "password": "secreto1", "display_name": "Ana"}),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);

        let token = self
            .mailer
            .last_token(email, MailKind::Confirmation)
            .unwrap();
        let (status, _) = self
            .send(keyed_empty("GET", &format!("/auth/v1/confirm?token={}", token)))
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = self
            .send_json(keyed_json(
                "POST",
                "/auth/v1/token",
                json!({"email": email, "password": "secreto1"}),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        serde_json::from_value(body).unwrap()
    }
}

fn keyed_empty(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("apikey", API_KEY)
        .body(Body::empty())
        .unwrap()
}

fn keyed_json(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("apikey", API_KEY)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn authed_json(method: &str, uri: &str, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("apikey", API_KEY)
        .header("authorization", format!("Bearer {}", token))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn authed_empty(method: &str, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("apikey", API_KEY)
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

/// Read full response body bytes.
async fn body_bytes(resp: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(resp.into_body(), 8 * 1024 * 1024)
        .await
        .unwrap()
        .to_vec()
}

fn save_body(session_id: &str, user_id: Uuid, input: &str, output: &str) -> Value {
    json!({
        "chat_session_id": session_id,
        "chat_session_title": "",
        "msg_input": input,
        "msg_output": output,
        "user_id": user_id,
        "agent_type": "registral",
    })
}

// =============================================================================
// Public endpoints and api key
// =============================================================================

#[tokio::test]
async fn test_health_no_key_required() {
    let app = TestApp::new();
    let (status, bytes) = app
        .send(Request::get("/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);
    let health: HealthResponse = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(health.status, "healthy");
}

#[tokio::test]
async fn test_missing_api_key_returns_401() {
    let app = TestApp::new();
    let (status, body) = app
        .send_json(
            Request::post("/auth/v1/token")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"email":"a@b.es","password":"x"}"#))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");
    assert!(body["message"].as_str().unwrap().contains("apikey"));
}

#[tokio::test]
async fn test_wrong_api_key_returns_401() {
    let app = TestApp::new();
    let (status, _) = app
        .send(
            Request::post("/functions/v1/load-user-data")
                .header("apikey", "nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// =============================================================================
// Auth
// =============================================================================

#[tokio::test]
async fn test_signup_requires_confirmation_before_signin() {
    let app = TestApp::new();
    let (status, body) = app
        .send_json(keyed_json(
            "POST",
            "/auth/v1/signup",
            json!({"email": "ana@notaria.es", "password": "secreto1", "display_name": "Ana"}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    let signup: SignUpResponse = serde_json::from_value(body).unwrap();
    assert!(signup.confirmation_required);

    let (status, body) = app
        .send_json(keyed_json(
            "POST",
            "/auth/v1/token",
            json!({"email": "ana@notaria.es", "password": "secreto1"}),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");
}

#[tokio::test]
async fn test_signup_without_confirmation_signs_in_directly() {
    let app = TestApp::with_config(|c| c.auth.require_email_confirmation = false);
    let (status, _) = app
        .send_json(keyed_json(
            "POST",
            "/auth/v1/signup",
            json!({"email": "ana@notaria.es", "password": "secreto1", "display_name": "Ana"}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(app.mailer.sent().is_empty());

    let (status, body) = app
        .send_json(keyed_json(
            "POST",
            "/auth/v1/token",
            json!({"email": "ana@notaria.es", "password": "secreto1"}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["access_token"].as_str().unwrap().len(), 32);
}

#[tokio::test]
async fn test_signup_duplicate_email_returns_409() {
    let app = TestApp::new();
    app.signed_in("ana@notaria.es").await;
    let (status, body) = app
        .send_json(keyed_json(
            "POST",
            "/auth/v1/signup",
            json!({"email": "ANA@notaria.es", "password": "secreto1", "display_name": "Otra"}),
        ))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");
}

#[tokio::test]
async fn test_signup_rejects_short_password_and_bad_email() {
    let app = TestApp::new();
    let (status, _) = app
        .send_json(keyed_json(
            "POST",
            "/auth/v1/signup",
            json!({"email": "ana@notaria.es", "password": "12345", "display_name": "Ana"}),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send_json(keyed_json(
            "POST",
            "/auth/v1/signup",
            json!({"email": "ana", "password": "secreto1", "display_name": "Ana"}),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_signin_wrong_password_returns_401() {
    let app = TestApp::new();
    app.signed_in("ana@notaria.es").await;
    let (status, body) = app
        .send_json(keyed_json(
            "POST",
            "/auth/v1/token",
            json!({"email": "ana@notaria.es", "password": "incorrecta"}),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid login credentials");
}

#[tokio::test]
async fn test_confirm_with_bad_token_returns_401() {
    let app = TestApp::new();
    let (status, _) = app
        .send(keyed_empty("GET", "/auth/v1/confirm?token=deadbeef"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_revokes_token() {
    let app = TestApp::new();
    let session = app.signed_in("ana@notaria.es").await;

    let (status, _) = app
        .send(authed_empty("POST", "/auth/v1/logout", &session.access_token))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .send(authed_empty(
            "POST",
            "/functions/v1/load-user-data",
            &session.access_token,
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_recover_is_silent_for_unknown_email() {
    let app = TestApp::new();
    let (status, _) = app
        .send_json(keyed_json(
            "POST",
            "/auth/v1/recover",
            json!({"email": "nadie@notaria.es"}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(app.mailer.sent().is_empty());
}

#[tokio::test]
async fn test_password_recovery_flow_is_single_use() {
    let app = TestApp::new();
    let old_session = app.signed_in("ana@notaria.es").await;

    let (status, _) = app
        .send_json(keyed_json(
            "POST",
            "/auth/v1/recover",
            json!({"email": "ana@notaria.es"}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    let recovery = app
        .mailer
        .last_token("ana@notaria.es", MailKind::Recovery)
        .unwrap();

    let (status, _) = app
        .send_json(authed_json(
            "PUT",
            "/auth/v1/user",
            &recovery,
            json!({"password": "nuevo-secreto"}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    // Second use of the same recovery token fails.
    let (status, _) = app
        .send_json(authed_json(
            "PUT",
            "/auth/v1/user",
            &recovery,
            json!({"password": "otro-secreto"}),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Old access token was revoked; new password works.
    let (status, _) = app
        .send(authed_empty(
            "POST",
            "/functions/v1/load-user-data",
            &old_session.access_token,
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .send_json(keyed_json(
            "POST",
            "/auth/v1/token",
            json!({"email": "ana@notaria.es", "password": "nuevo-secreto"}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_update_password_with_access_token_is_rejected() {
    let app = TestApp::new();
    let session = app.signed_in("ana@notaria.es").await;
    let (status, _) = app
        .send_json(authed_json(
            "PUT",
            "/auth/v1/user",
            &session.access_token,
            json!({"password": "nuevo-secreto"}),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// =============================================================================
// Functions
// =============================================================================

#[tokio::test]
async fn test_load_user_data_empty_for_new_user() {
    let app = TestApp::new();
    let session = app.signed_in("ana@notaria.es").await;

    let (status, body) = app
        .send_json(authed_json(
            "POST",
            "/functions/v1/load-user-data",
            &session.access_token,
            json!({}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    let data: LoadUserDataResponse = serde_json::from_value(body).unwrap();
    assert_eq!(data.user_id, session.user_id);
    assert!(data.chat_sessions.is_empty());
}

#[tokio::test]
async fn test_save_exchange_then_load() {
    let app = TestApp::new();
    let session = app.signed_in("ana@notaria.es").await;
    let token = &session.access_token;

    for (input, output) in [("¿Qué es una hipoteca?", "Una garantía real."), ("¿Y la anotación?", "Una medida cautelar.")] {
        let (status, body) = app
            .send_json(authed_json(
                "POST",
                "/functions/v1/save-exchange",
                token,
                save_body("s-1", session.user_id, input, output),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        let saved: SaveExchangeResponse = serde_json::from_value(body).unwrap();
        assert_eq!(saved.chat_session_id, "s-1");
    }

    let (_, body) = app
        .send_json(authed_json(
            "POST",
            "/functions/v1/load-user-data",
            token,
            json!({}),
        ))
        .await;
    let data: LoadUserDataResponse = serde_json::from_value(body).unwrap();
    assert_eq!(data.chat_sessions.len(), 1);
    let remote = &data.chat_sessions[0];
    // Empty title was derived from the first message.
    assert_eq!(remote.chat_session_title, "¿Qué es una hipoteca?");
    assert_eq!(remote.messages.len(), 2);
    assert_eq!(remote.messages[1].msg_output, "Una medida cautelar.");
}

#[tokio::test]
async fn test_save_exchange_for_other_user_is_forbidden() {
    let app = TestApp::new();
    let session = app.signed_in("ana@notaria.es").await;
    let (status, _) = app
        .send_json(authed_json(
            "POST",
            "/functions/v1/save-exchange",
            &session.access_token,
            save_body("s-1", Uuid::new_v4(), "a", "b"),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_save_exchange_into_foreign_session_conflicts() {
    let app = TestApp::new();
    let ana = app.signed_in("ana@notaria.es").await;
    let luis = app.signed_in("luis@notaria.es").await;

    let (status, _) = app
        .send_json(authed_json(
            "POST",
            "/functions/v1/save-exchange",
            &ana.access_token,
            save_body("shared-id", ana.user_id, "a", "b"),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .send_json(authed_json(
            "POST",
            "/functions/v1/save-exchange",
            &luis.access_token,
            save_body("shared-id", luis.user_id, "c", "d"),
        ))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");
}

#[tokio::test]
async fn test_create_session_on_login_returns_fresh_ids() {
    let app = TestApp::new();
    let session = app.signed_in("ana@notaria.es").await;

    let mut ids = Vec::new();
    for _ in 0..2 {
        let (status, body) = app
            .send_json(authed_json(
                "POST",
                "/functions/v1/create-session-on-login",
                &session.access_token,
                json!({"agent_type": "notarial"}),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        let created: CreateSessionResponse = serde_json::from_value(body).unwrap();
        ids.push(created.chat_session_id);
    }
    assert_ne!(ids[0], ids[1]);

    let (_, body) = app
        .send_json(authed_json(
            "POST",
            "/functions/v1/load-user-data",
            &session.access_token,
            json!({}),
        ))
        .await;
    let data: LoadUserDataResponse = serde_json::from_value(body).unwrap();
    assert_eq!(data.chat_sessions.len(), 2);
    assert!(data.chat_sessions.iter().all(|s| s.messages.is_empty()));
}

#[tokio::test]
async fn test_rename_title_limits() {
    let app = TestApp::new();
    let session = app.signed_in("ana@notaria.es").await;
    let token = &session.access_token;
    app.send_json(authed_json(
        "POST",
        "/functions/v1/save-exchange",
        token,
        save_body("s-1", session.user_id, "a", "b"),
    ))
    .await;

    let rename = |title: String| {
        authed_json(
            "POST",
            "/functions/v1/rename-session",
            token,
            json!({"chat_session_id": "s-1", "new_title": title, "user_id": session.user_id}),
        )
    };

    let (status, _) = app.send_json(rename("x".repeat(101))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.send_json(rename("   ".to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.send_json(rename("y".repeat(100))).await;
    assert_eq!(status, StatusCode::OK);

    // Surrounding spaces do not count toward the limit.
    let padded = format!("  {}  ", "z".repeat(100));
    let (status, _) = app.send_json(rename(padded)).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app
        .send_json(authed_json(
            "POST",
            "/functions/v1/load-user-data",
            token,
            json!({}),
        ))
        .await;
    let data: LoadUserDataResponse = serde_json::from_value(body).unwrap();
    assert_eq!(data.chat_sessions[0].chat_session_title, "z".repeat(100));
}

#[tokio::test]
async fn test_rename_and_delete_unknown_session_return_404() {
    let app = TestApp::new();
    let session = app.signed_in("ana@notaria.es").await;

    let (status, _) = app
        .send_json(authed_json(
            "POST",
            "/functions/v1/rename-session",
            &session.access_token,
            json!({"chat_session_id": "missing", "new_title": "t", "user_id": session.user_id}),
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .send_json(authed_json(
            "POST",
            "/functions/v1/delete-session",
            &session.access_token,
            json!({"chat_session_id": "missing", "user_id": session.user_id}),
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_session_removes_rows() {
    let app = TestApp::new();
    let session = app.signed_in("ana@notaria.es").await;
    let token = &session.access_token;
    app.send_json(authed_json(
        "POST",
        "/functions/v1/save-exchange",
        token,
        save_body("s-1", session.user_id, "a", "b"),
    ))
    .await;

    let (status, _) = app
        .send_json(authed_json(
            "POST",
            "/functions/v1/delete-session",
            token,
            json!({"chat_session_id": "s-1", "user_id": session.user_id}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app
        .send_json(authed_json(
            "POST",
            "/functions/v1/load-user-data",
            token,
            json!({}),
        ))
        .await;
    let data: LoadUserDataResponse = serde_json::from_value(body).unwrap();
    assert!(data.chat_sessions.is_empty());

    let count: i64 = app
        .state
        .database
        .with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM chat_messages", [], |row| row.get(0))
                .map_err(|e| dante_core::error::DanteError::Storage(e.to_string()))
        })
        .unwrap();
    assert_eq!(count, 0);
}

// =============================================================================
// Profile and avatar
// =============================================================================

#[tokio::test]
async fn test_profile_created_on_signin_and_patchable() {
    let app = TestApp::new();
    let session = app.signed_in("ana@notaria.es").await;

    let (status, body) = app
        .send_json(authed_empty("GET", "/rest/v1/profile", &session.access_token))
        .await;
    assert_eq!(status, StatusCode::OK);
    let profile: Profile = serde_json::from_value(body).unwrap();
    assert_eq!(profile.display_name, "Ana");
    assert!(profile.avatar_url.is_none());

    let (status, body) = app
        .send_json(authed_json(
            "PATCH",
            "/rest/v1/profile",
            &session.access_token,
            json!({"display_name": "Ana García"}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["display_name"], "Ana García");
}

#[tokio::test]
async fn test_avatar_upload_and_download() {
    let app = TestApp::new();
    let session = app.signed_in("ana@notaria.es").await;
    let png = vec![0x89, b'P', b'N', b'G', 0, 1, 2, 3];

    let (status, body) = app
        .send_json(
            Request::put("/storage/v1/avatar")
                .header("apikey", API_KEY)
                .header("authorization", format!("Bearer {}", session.access_token))
                .header("content-type", "image/png")
                .body(Body::from(png.clone()))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let url = body["avatar_url"].as_str().unwrap();
    assert_eq!(
        url,
        format!("http://dante.test/storage/v1/avatar/{}", session.user_id)
    );

    let resp = app
        .router()
        .oneshot(
            Request::get(format!("/storage/v1/avatar/{}", session.user_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "image/png");
    assert_eq!(body_bytes(resp).await, png);
}

#[tokio::test]
async fn test_avatar_rejects_type_and_size() {
    let app = TestApp::with_config(|c| c.server.max_avatar_bytes = 16);
    let session = app.signed_in("ana@notaria.es").await;

    let upload = |content_type: &str, len: usize| {
        Request::put("/storage/v1/avatar")
            .header("apikey", API_KEY)
            .header("authorization", format!("Bearer {}", session.access_token))
            .header("content-type", content_type)
            .body(Body::from(vec![7u8; len]))
            .unwrap()
    };

    let (status, _) = app.send(upload("image/gif", 8)).await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let (status, body) = app.send_json(upload("image/webp", 17)).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["error"], "payload_too_large");

    let (status, _) = app.send(upload("image/webp", 16)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_avatar_missing_returns_404() {
    let app = TestApp::new();
    let (status, _) = app
        .send(
            Request::get(format!("/storage/v1/avatar/{}", Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
