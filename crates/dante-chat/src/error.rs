//! Error types for the chat client.

use dante_core::error::DanteError;
use dante_core::validation::ValidationError;

/// Failures calling the conversational flow engine. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("flow request failed: {0}")]
    Transport(String),
    #[error("flow request timed out")]
    Timeout,
    #[error("flow returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("flow response is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("flow response has no recognizable reply")]
    Unrecognized,
}

/// Failures calling the backend service.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    #[error("not authenticated: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid response: {0}")]
    Decode(String),
}

impl BackendError {
    /// Build from a non-2xx status and the server's error message.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 => BackendError::Unauthorized(message),
            403 => BackendError::Forbidden(message),
            404 => BackendError::NotFound(message),
            409 => BackendError::Conflict(message),
            400..=499 if status != 408 && status != 429 => BackendError::Rejected(message),
            _ => BackendError::Server { status, message },
        }
    }

    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Transport(_) => true,
            BackendError::Server { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            _ => false,
        }
    }
}

/// An exchange the sender gave up on.
#[derive(Debug, thiserror::Error)]
#[error("exchange not saved after {attempts} attempt(s): {source}")]
pub struct SaveError {
    pub attempts: u32,
    #[source]
    pub source: BackendError,
}

impl SaveError {
    pub fn is_conflict(&self) -> bool {
        matches!(self.source, BackendError::Conflict(_))
    }
}

/// Auth gateway failures. `Display` is the message shown to the user.
#[derive(Debug, thiserror::Error)]
pub enum AuthFailure {
    #[error("{0}")]
    Invalid(#[from] ValidationError),
    #[error("Correo electrónico o contraseña incorrectos")]
    InvalidCredentials,
    #[error("Debes confirmar tu correo electrónico antes de iniciar sesión")]
    EmailNotConfirmed,
    #[error("Ya existe una cuenta con ese correo electrónico")]
    EmailTaken,
    #[error("El enlace de recuperación ha caducado o ya se ha utilizado")]
    RecoveryExpired,
    #[error("No hay ninguna sesión iniciada")]
    NotSignedIn,
    #[error("No se pudo contactar con el servidor: {0}")]
    Unavailable(String),
}

/// Errors surfaced by the chat controller.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error(transparent)]
    Flow(#[from] FlowError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("store error: {0}")]
    Store(String),
}

impl ChatError {
    /// True when the backend rejected the access token.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ChatError::Backend(BackendError::Unauthorized(_)))
    }
}

impl From<DanteError> for ChatError {
    fn from(err: DanteError) -> Self {
        match err {
            DanteError::Config(msg) => ChatError::Config(msg),
            other => ChatError::Store(other.to_string()),
        }
    }
}
