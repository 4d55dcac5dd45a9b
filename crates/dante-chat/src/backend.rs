//! Backend service client.
//!
//! Two seams: [`AuthBackend`] for the `/auth/v1` endpoints and
//! [`SessionBackend`] for the server-side session functions. Both are
//! implemented by the reqwest-backed [`BackendClient`], which also covers
//! the profile and avatar endpoints.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use dante_core::config::ClientSettings;
use dante_core::types::{
    AgentType, AvatarResponse, CreateSessionRequest, CreateSessionResponse, DeleteSessionRequest,
    ErrorBody, LoadUserDataResponse, Profile, RecoverRequest, RenameSessionRequest,
    SaveExchangeRequest, SaveExchangeResponse, SignUpRequest, SignUpResponse, TokenRequest,
    TokenResponse, UpdatePasswordRequest, UpdateProfileRequest,
};

use crate::error::BackendError;

#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn sign_up(&self, request: &SignUpRequest) -> Result<SignUpResponse, BackendError>;
    async fn sign_in(&self, request: &TokenRequest) -> Result<TokenResponse, BackendError>;
    async fn sign_out(&self, access_token: &str) -> Result<(), BackendError>;
    async fn recover(&self, email: &str) -> Result<(), BackendError>;
    async fn update_password(
        &self,
        recovery_token: &str,
        password: &str,
    ) -> Result<(), BackendError>;
}

/// Server-side session functions, all authenticated with an access token.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Allocate an empty session and return its id.
    async fn create_session(
        &self,
        access_token: &str,
        agent: AgentType,
    ) -> Result<String, BackendError>;

    async fn load_user_data(&self, access_token: &str)
        -> Result<LoadUserDataResponse, BackendError>;

    async fn save_exchange(
        &self,
        access_token: &str,
        request: &SaveExchangeRequest,
    ) -> Result<SaveExchangeResponse, BackendError>;

    async fn rename_session(
        &self,
        access_token: &str,
        session_id: &str,
        user_id: Uuid,
        title: &str,
    ) -> Result<(), BackendError>;

    async fn delete_session(
        &self,
        access_token: &str,
        session_id: &str,
        user_id: Uuid,
    ) -> Result<(), BackendError>;
}

/// reqwest client for the Dante backend.
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl BackendClient {
    pub fn new(settings: &ClientSettings) -> Self {
        Self::with_base_url(&settings.backend_url, &settings.backend_key)
    }

    pub fn with_base_url(base_url: &str, api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn request(&self, method: Method, path: &str, bearer: Option<&str>) -> RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .header("apikey", &self.api_key);
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn execute(builder: RequestBuilder) -> Result<reqwest::Response, BackendError> {
        let response = builder
            .send()
            .await
            .map_err(|err| BackendError::Transport(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|e| e.message)
            .unwrap_or(body);
        Err(BackendError::from_status(status.as_u16(), message))
    }

    async fn send_json<T: DeserializeOwned>(
        builder: RequestBuilder,
    ) -> Result<T, BackendError> {
        Self::execute(builder)
            .await?
            .json::<T>()
            .await
            .map_err(|err| BackendError::Decode(err.to_string()))
    }

    async fn post_json<B, T>(&self, path: &str, bearer: Option<&str>, body: &B) -> Result<T, BackendError>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        Self::send_json(self.request(Method::POST, path, bearer).json(body)).await
    }

    pub async fn get_profile(&self, access_token: &str) -> Result<Profile, BackendError> {
        Self::send_json(self.request(Method::GET, "/rest/v1/profile", Some(access_token))).await
    }

    pub async fn update_display_name(
        &self,
        access_token: &str,
        display_name: &str,
    ) -> Result<Profile, BackendError> {
        let body = UpdateProfileRequest {
            display_name: Some(display_name.to_string()),
        };
        Self::send_json(
            self.request(Method::PATCH, "/rest/v1/profile", Some(access_token))
                .json(&body),
        )
        .await
    }

    pub async fn upload_avatar(
        &self,
        access_token: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, BackendError> {
        let response: AvatarResponse = Self::send_json(
            self.request(Method::PUT, "/storage/v1/avatar", Some(access_token))
                .header("content-type", content_type)
                .body(bytes),
        )
        .await?;
        Ok(response.avatar_url)
    }
}

#[async_trait]
impl AuthBackend for BackendClient {
    async fn sign_up(&self, request: &SignUpRequest) -> Result<SignUpResponse, BackendError> {
        self.post_json("/auth/v1/signup", None, request).await
    }

    async fn sign_in(&self, request: &TokenRequest) -> Result<TokenResponse, BackendError> {
        self.post_json("/auth/v1/token", None, request).await
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), BackendError> {
        Self::execute(self.request(Method::POST, "/auth/v1/logout", Some(access_token))).await?;
        Ok(())
    }

    async fn recover(&self, email: &str) -> Result<(), BackendError> {
        let body = RecoverRequest {
            email: email.to_string(),
        };
        Self::execute(self.request(Method::POST, "/auth/v1/recover", None).json(&body)).await?;
        Ok(())
    }

    async fn update_password(
        &self,
        recovery_token: &str,
        password: &str,
    ) -> Result<(), BackendError> {
        let body = UpdatePasswordRequest {
            password: password.to_string(),
        };
        Self::execute(
            self.request(Method::PUT, "/auth/v1/user", Some(recovery_token))
                .json(&body),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SessionBackend for BackendClient {
    async fn create_session(
        &self,
        access_token: &str,
        agent: AgentType,
    ) -> Result<String, BackendError> {
        let body = CreateSessionRequest {
            agent_type: Some(agent),
        };
        let response: CreateSessionResponse = self
            .post_json(
                "/functions/v1/create-session-on-login",
                Some(access_token),
                &body,
            )
            .await?;
        Ok(response.chat_session_id)
    }

    async fn load_user_data(
        &self,
        access_token: &str,
    ) -> Result<LoadUserDataResponse, BackendError> {
        self.post_json(
            "/functions/v1/load-user-data",
            Some(access_token),
            &serde_json::json!({}),
        )
        .await
    }

    async fn save_exchange(
        &self,
        access_token: &str,
        request: &SaveExchangeRequest,
    ) -> Result<SaveExchangeResponse, BackendError> {
        self.post_json("/functions/v1/save-exchange", Some(access_token), request)
            .await
    }

    async fn rename_session(
        &self,
        access_token: &str,
        session_id: &str,
        user_id: Uuid,
        title: &str,
    ) -> Result<(), BackendError> {
        let body = RenameSessionRequest {
            chat_session_id: session_id.to_string(),
            new_title: title.to_string(),
            user_id,
        };
        Self::execute(
            self.request(Method::POST, "/functions/v1/rename-session", Some(access_token))
                .json(&body),
        )
        .await?;
        Ok(())
    }

    async fn delete_session(
        &self,
        access_token: &str,
        session_id: &str,
        user_id: Uuid,
    ) -> Result<(), BackendError> {
        let body = DeleteSessionRequest {
            chat_session_id: session_id.to_string(),
            user_id,
        };
        Self::execute(
            self.request(Method::POST, "/functions/v1/delete-session", Some(access_token))
                .json(&body),
        )
        .await?;
        Ok(())
    }
}
