//! Outbound account email.
//!
//! The backend never talks SMTP itself. It hands confirmation and recovery
//! mails to a [`Mailer`]; [`LogMailer`] writes them to the log and
//! [`MemoryMailer`] keeps them for inspection.

use std::sync::Mutex;

use dante_core::error::DanteError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailKind {
    /// Sent after sign-up; the link confirms the address.
    Confirmation,
    /// Sent on a password reset request; the token authorizes one password update.
    Recovery,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub to: String,
    pub kind: MailKind,
    pub token: String,
    pub link: String,
}

/// Delivery channel for account email.
pub trait Mailer: Send + Sync {
    fn send(&self, mail: &Mail) -> Result<(), DanteError>;
}

/// Writes each mail to the structured log. Intended for self-hosted setups
/// where the operator relays links by hand.
#[derive(Debug, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, mail: &Mail) -> Result<(), DanteError> {
        tracing::info!(to = %mail.to, kind = ?mail.kind, link = %mail.link, "Account email");
        Ok(())
    }
}

/// Keeps sent mail in memory.
#[derive(Debug, Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<Mail>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Mail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Token of the most recent mail of `kind` sent to `to`.
    pub fn last_token(&self, to: &str, kind: MailKind) -> Option<String> {
        self.sent()
            .into_iter()
            .rev()
            .find(|m| m.kind == kind && m.to.eq_ignore_ascii_case(to))
            .map(|m| m.token)
    }
}

impl Mailer for MemoryMailer {
    fn send(&self, mail: &Mail) -> Result<(), DanteError> {
        self.sent
            .lock()
            .map_err(|e| DanteError::Integration(format!("Mailer lock poisoned: {}", e)))?
            .push(mail.clone());
        Ok(())
    }
}
