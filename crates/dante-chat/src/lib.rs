//! Chat client for Dante.
//!
//! Everything the front end needs between the user and the two remote
//! systems: the auth gateway, the conversational flow engine client with
//! its reply extractor, the backend functions client, the best-effort
//! session cache, the retrying persistence sender and the session-list /
//! welcome state machine driven by [`ChatController`].

pub mod auth;
pub mod backend;
pub mod cache;
pub mod controller;
pub mod error;
pub mod extractor;
pub mod flow;
pub mod sender;
pub mod state;
pub mod store;

pub use auth::{AuthGateway, AuthSession, SignUpOutcome, AUTH_SESSION_KEY};
pub use backend::{AuthBackend, BackendClient, SessionBackend};
pub use cache::{CacheSnapshot, SessionCache, SessionSummary, UiState, CACHE_KEY};
pub use controller::{ChatController, ControllerOptions, SendOutcome, FALLBACK_REPLY};
pub use error::{AuthFailure, BackendError, ChatError, FlowError, SaveError};
pub use extractor::{ExtractedReply, ReplyExtractor, ReplyStrategy, UNRECOGNIZED_REPLY};
pub use flow::{FlowEngine, HttpFlowClient};
pub use sender::{Delivery, PersistenceSender, RetryPolicy, StatusCallback, SyncStatus};
pub use state::{ChatMessage, ChatSession, ChatState, LoadState, MessageStatus, Role, ViewState};
pub use store::{FileStore, KeyValueStore, MemoryStore};
