//! CLI argument definitions for the Dante binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use dante_core::types::AgentType;

/// Dante, a legal assistant for notarial and registry questions.
#[derive(Parser, Debug)]
#[command(name = "dante", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Data directory for the database, avatars and the client session.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the backend API server.
    Serve {
        /// Listen port.
        #[arg(short = 'p', long = "port")]
        port: Option<u16>,
        /// Listen address.
        #[arg(long = "host")]
        host: Option<String>,
    },
    /// Create an account.
    Signup {
        email: String,
        /// Name shown in the profile.
        #[arg(short = 'n', long = "name")]
        name: Option<String>,
    },
    /// Sign in and remember the session.
    Signin { email: String },
    /// Forget the local session and revoke it.
    Signout,
    /// Mail a password recovery link.
    ResetPassword { email: String },
    /// Set a new password with the token from a recovery link.
    UpdatePassword { token: String },
    /// Show or edit the signed-in user's profile.
    Profile {
        /// New display name.
        #[arg(short = 'n', long = "name")]
        name: Option<String>,
        /// Image to upload as avatar (png, jpeg or webp).
        #[arg(long = "avatar")]
        avatar: Option<PathBuf>,
    },
    /// List the signed-in user's sessions.
    Sessions,
    /// Start an interactive chat.
    Chat {
        /// Specialist for new sessions: registral or notarial.
        #[arg(short = 'a', long = "agent", default_value = "registral")]
        agent: AgentType,
    },
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > DANTE_CONFIG env var > ~/.dante/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("DANTE_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the data directory override, if any.
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    /// Resolve the log filter.
    ///
    /// Priority: --log-level flag > RUST_LOG > config file value.
    pub fn resolve_log_filter(&self, config_level: &str) -> String {
        if let Some(ref level) = self.log_level {
            return level.clone();
        }
        std::env::var("RUST_LOG").unwrap_or_else(|_| config_level.to_string())
    }
}

/// Resolve the server port.
///
/// Priority: --port flag > DANTE_PORT env var > config file value.
pub fn resolve_port(flag: Option<u16>, config_port: u16) -> u16 {
    if let Some(p) = flag {
        return p;
    }
    std::env::var("DANTE_PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(config_port)
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".dante").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".dante").join("config.toml");
    }
    PathBuf::from("config.toml")
}
