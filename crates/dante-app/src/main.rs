//! Dante application binary - composition root.
//!
//! `dante serve` runs the backend API over SQLite. Every other subcommand
//! is a client of a running backend and the flow engine.

mod cli;
mod commands;

use std::sync::Arc;

use clap::Parser;

use dante_api::{start_server, AppState, LogMailer};
use dante_core::config::DanteConfig;
use dante_storage::Database;

use cli::{CliArgs, Command};
use commands::{Client, CmdResult};

async fn serve(mut config: DanteConfig, port: Option<u16>, host: Option<String>) -> CmdResult {
    config.server.port = cli::resolve_port(port, config.server.port);
    if let Some(host) = host {
        config.server.host = host;
    }

    let data_dir = config.general.data_path();
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }

    let db_path = data_dir.join("dante.db");
    let db = Database::new(&db_path)?;
    tracing::info!(path = %db_path.display(), "SQLite database opened");

    if !config.auth.require_email_confirmation {
        tracing::warn!("Email confirmation disabled; new accounts can sign in right away");
    }

    let state = AppState::new(config.clone(), db, Arc::new(LogMailer));
    start_server(&config, state).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> CmdResult {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let config_exists = config_file.exists();
    let mut config = if config_exists {
        DanteConfig::load(&config_file)?
    } else {
        DanteConfig::default()
    };
    config.apply_env();
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }

    // Client commands share the terminal with the user; keep them quiet.
    let default_level = match args.command {
        Command::Serve { .. } => config.general.log_level.clone(),
        _ => "warn".to_string(),
    };
    let filter = args.resolve_log_filter(&default_level);
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&filter)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::debug!(
        path = %config_file.display(),
        found = config_exists,
        "Configuration resolved"
    );

    match args.command {
        Command::Serve { port, host } => {
            tracing::info!("Starting Dante v{}", env!("CARGO_PKG_VERSION"));
            serve(config, port, host).await
        }
        command => {
            let client = Client::new(config)?;
            client.run(command).await
        }
    }
}
