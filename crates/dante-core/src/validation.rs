//! Input validation shared by the client and the server.
//!
//! Error messages are user-facing and shown inline next to the offending
//! field, so they are written in Spanish.

use std::sync::OnceLock;

use regex::Regex;

/// Maximum length of a session title, in characters.
pub const MAX_TITLE_CHARS: usize = 100;

/// Minimum password length accepted at sign-up and password update.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Title given to a session before its first message is known.
pub const DEFAULT_TITLE: &str = "Nueva conversación";

/// Validation failures for user-supplied fields.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("El correo electrónico no es válido")]
    InvalidEmail,
    #[error("La contraseña debe tener al menos {0} caracteres")]
    PasswordTooShort(usize),
    #[error("Las contraseñas no coinciden")]
    PasswordMismatch,
    #[error("El título no puede estar vacío")]
    EmptyTitle,
    #[error("El título no puede superar los {0} caracteres")]
    TitleTooLong(usize),
    #[error("El mensaje no puede estar vacío")]
    EmptyMessage,
}

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$")
            .expect("email pattern is valid")
    })
}

/// Check that `email` looks like a deliverable address.
pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    if email_regex().is_match(email.trim()) {
        Ok(())
    } else {
        Err(ValidationError::InvalidEmail)
    }
}

/// Check the password length (in characters).
pub fn validate_password(password: &str, min_len: usize) -> Result<(), ValidationError> {
    if password.chars().count() < min_len {
        return Err(ValidationError::PasswordTooShort(min_len));
    }
    Ok(())
}

/// Check that the confirmation field matches the password.
pub fn validate_confirmation(password: &str, confirmation: &str) -> Result<(), ValidationError> {
    if password != confirmation {
        return Err(ValidationError::PasswordMismatch);
    }
    Ok(())
}

/// Check a session title. Exactly [`MAX_TITLE_CHARS`] characters is accepted.
pub fn validate_title(title: &str) -> Result<(), ValidationError> {
    if title.trim().is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(ValidationError::TitleTooLong(MAX_TITLE_CHARS));
    }
    Ok(())
}

/// Derive a session title from the first user message.
///
/// Whitespace is collapsed; messages longer than `max_chars` are cut on a
/// character boundary and suffixed with `...`.
pub fn derive_title(first_message: &str, max_chars: usize) -> String {
    let collapsed = first_message.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let cut: String = collapsed.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}
