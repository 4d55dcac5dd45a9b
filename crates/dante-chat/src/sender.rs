//! Message persistence sender.
//!
//! Stores completed exchanges through the backend's save-exchange function
//! with bounded retries and exponential backoff. Deliveries for the same
//! session are serialized so appends never interleave.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

use dante_core::config::SenderConfig;
use dante_core::types::{SaveExchangeRequest, SaveExchangeResponse};

use crate::backend::SessionBackend;
use crate::error::SaveError;

/// Per-message persistence status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Sending,
    Sent,
    Failed,
}

/// Receives `(message_id, status)` updates.
pub type StatusCallback = Arc<dyn Fn(&str, SyncStatus) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each failure.
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&SenderConfig::default())
    }
}

impl From<&SenderConfig> for RetryPolicy {
    fn from(config: &SenderConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
        }
    }
}

/// One exchange to store.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Client-side id of the user message the status updates refer to.
    pub message_id: String,
    pub access_token: String,
    pub request: SaveExchangeRequest,
}

type SessionLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Exclusive turn of one delivery on its session. On drop the session's
/// entry is removed once nobody else holds or waits on it.
struct SessionTurn<'a> {
    locks: &'a SessionLocks,
    session_id: String,
    lock: Arc<tokio::sync::Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SessionTurn<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let Ok(mut locks) = self.locks.lock() else {
            return;
        };
        // New holders are only handed out under the map lock.
        let ours = matches!(locks.get(&self.session_id), Some(l) if Arc::ptr_eq(l, &self.lock));
        if ours && Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.session_id);
        }
    }
}

pub struct PersistenceSender {
    backend: Arc<dyn SessionBackend>,
    policy: RetryPolicy,
    session_locks: SessionLocks,
}

impl PersistenceSender {
    pub fn new(backend: Arc<dyn SessionBackend>, policy: RetryPolicy) -> Self {
        Self {
            backend,
            policy,
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    fn lock_for(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        match self.session_locks.lock() {
            Ok(mut locks) => Arc::clone(locks.entry(session_id.to_string()).or_default()),
            // A poisoned map only loses ordering, not data.
            Err(_) => Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    async fn turn(&self, session_id: &str) -> SessionTurn<'_> {
        let lock = self.lock_for(session_id);
        let guard = Arc::clone(&lock).lock_owned().await;
        SessionTurn {
            locks: &self.session_locks,
            session_id: session_id.to_string(),
            lock,
            guard: Some(guard),
        }
    }

    /// Store one exchange, retrying transient failures.
    ///
    /// Reports `Sending` once, then `Sent` or `Failed`. Authentication and
    /// conflict errors end the delivery on the first attempt.
    pub async fn deliver(
        &self,
        delivery: &Delivery,
        on_status: &StatusCallback,
    ) -> Result<SaveExchangeResponse, SaveError> {
        let _turn = self.turn(&delivery.request.chat_session_id).await;

        on_status(&delivery.message_id, SyncStatus::Sending);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .backend
                .save_exchange(&delivery.access_token, &delivery.request)
                .await
            {
                Ok(response) => {
                    debug!(
                        session_id = %delivery.request.chat_session_id,
                        message_id = response.message_id,
                        attempt,
                        "Exchange saved"
                    );
                    on_status(&delivery.message_id, SyncStatus::Sent);
                    return Ok(response);
                }
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.backoff_after(attempt);
                    debug!(
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Save failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        session_id = %delivery.request.chat_session_id,
                        attempt,
                        "Exchange not saved"
                    );
                    on_status(&delivery.message_id, SyncStatus::Failed);
                    return Err(SaveError {
                        attempts: attempt,
                        source: e,
                    });
                }
            }
        }
    }
}
