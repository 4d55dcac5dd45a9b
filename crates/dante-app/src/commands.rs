//! Client subcommands and the interactive chat loop.

use std::error::Error;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use dante_chat::{
    AuthFailure, AuthGateway, AuthSession, BackendClient, ChatController, ChatSession,
    ChatState, ControllerOptions, FileStore, HttpFlowClient, MessageStatus, PersistenceSender,
    RetryPolicy, Role, SessionCache, SignUpOutcome, SyncStatus, ViewState,
};
use dante_core::config::{ClientSettings, DanteConfig};
use dante_core::error::DanteError;
use dante_core::types::AgentType;

use crate::cli::Command;

pub type CmdResult = Result<(), Box<dyn Error>>;

/// Read one line from the terminal after printing `label`.
fn prompt(label: &str) -> std::io::Result<String> {
    print!("{}", label);
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Everything the client subcommands share.
pub struct Client {
    config: DanteConfig,
    settings: ClientSettings,
    backend: Arc<BackendClient>,
    store: Arc<FileStore>,
    gateway: AuthGateway,
}

impl Client {
    /// Fails if a required client setting is missing.
    pub fn new(config: DanteConfig) -> Result<Self, DanteError> {
        let settings = ClientSettings::resolve(&config)?;
        let backend = Arc::new(BackendClient::new(&settings));
        let store = Arc::new(FileStore::new(config.general.data_path().join("client")));
        let gateway = AuthGateway::new(
            backend.clone(),
            store.clone(),
            config.auth.min_password_len,
        );
        Ok(Self {
            config,
            settings,
            backend,
            store,
            gateway,
        })
    }

    pub async fn run(&self, command: Command) -> CmdResult {
        match command {
            Command::Signup { email, name } => self.signup(&email, name).await,
            Command::Signin { email } => self.signin(&email).await,
            Command::Signout => {
                self.gateway.sign_out().await?;
                println!("Sesión cerrada.");
                Ok(())
            }
            Command::ResetPassword { email } => {
                self.gateway.request_password_reset(&email).await?;
                println!("Si existe una cuenta con ese correo, recibirás un enlace para restablecer la contraseña.");
                Ok(())
            }
            Command::UpdatePassword { token } => self.update_password(&token).await,
            Command::Profile { name, avatar } => self.profile(name, avatar).await,
            Command::Sessions => self.sessions().await,
            Command::Chat { agent } => self.chat(agent).await,
            Command::Serve { .. } => Ok(()),
        }
    }

    async fn signup(&self, email: &str, name: Option<String>) -> CmdResult {
        let password = prompt("Contraseña: ")?;
        let confirmation = prompt("Repite la contraseña: ")?;
        let name = name.unwrap_or_else(|| email.split('@').next().unwrap_or(email).to_string());

        match self
            .gateway
            .sign_up(email, &password, &confirmation, &name)
            .await?
        {
            SignUpOutcome::ConfirmationRequired { .. } => {
                println!("Cuenta creada. Revisa tu correo para confirmarla antes de iniciar sesión.")
            }
            SignUpOutcome::Ready { .. } => println!("Cuenta creada. Ya puedes iniciar sesión."),
        }
        Ok(())
    }

    async fn signin(&self, email: &str) -> CmdResult {
        let password = prompt("Contraseña: ")?;
        let session = self.gateway.sign_in(email, &password).await?;
        println!("Sesión iniciada como {}.", session.email);
        Ok(())
    }

    async fn update_password(&self, token: &str) -> CmdResult {
        let password = prompt("Nueva contraseña: ")?;
        let confirmation = prompt("Repite la contraseña: ")?;
        self.gateway
            .update_password(token, &password, &confirmation)
            .await?;
        println!("Contraseña actualizada. Inicia sesión de nuevo.");
        Ok(())
    }

    fn require_session(&self) -> Result<AuthSession, AuthFailure> {
        self.gateway.current_session().ok_or(AuthFailure::NotSignedIn)
    }

    fn controller(&self, session: AuthSession, agent: AgentType) -> Result<ChatController, Box<dyn Error>> {
        let flow = Arc::new(HttpFlowClient::new(&self.settings)?);
        let sender = Arc::new(PersistenceSender::new(
            self.backend.clone(),
            RetryPolicy::from(&self.config.sender),
        ));
        let options = ControllerOptions {
            default_agent: agent,
            ..ControllerOptions::from(&self.config.chat)
        };
        Ok(ChatController::new(
            session,
            flow,
            self.backend.clone(),
            sender,
            SessionCache::new(self.store.clone()),
            options,
        ))
    }

    async fn profile(&self, name: Option<String>, avatar: Option<PathBuf>) -> CmdResult {
        let session = self.require_session()?;
        let token = session.access_token.as_str();

        if let Some(name) = name {
            self.backend.update_display_name(token, name.trim()).await?;
        }
        if let Some(path) = avatar {
            let content_type = avatar_content_type(&path)
                .ok_or("El avatar debe ser una imagen png, jpeg o webp.")?;
            let bytes = tokio::fs::read(&path).await?;
            self.backend.upload_avatar(token, bytes, content_type).await?;
        }

        let profile = self.backend.get_profile(token).await?;
        println!("Correo:  {}", session.email);
        println!("Nombre:  {}", profile.display_name);
        if let Some(url) = profile.avatar_url {
            println!("Avatar:  {}", url);
        }
        Ok(())
    }

    async fn sessions(&self) -> CmdResult {
        let controller = self.controller(self.require_session()?, AgentType::default())?;
        controller.load().await?;
        print_sessions(&controller.state());
        Ok(())
    }

    async fn chat(&self, agent: AgentType) -> CmdResult {
        let controller = self.controller(self.require_session()?, agent)?;
        controller.restore_from_cache();
        if let Err(e) = controller.load().await {
            if e.is_unauthorized() {
                self.gateway.sign_out().await.ok();
                return Err("La sesión ha caducado. Inicia sesión de nuevo.".into());
            }
            eprintln!("No se pudieron cargar las conversaciones: {}", e);
        }

        println!("Dante ({}). Escribe /ayuda para ver los comandos.", agent);
        print_view(&controller.state());
        repl(&controller).await?;
        controller.flush().await;
        Ok(())
    }
}

/// Content type of an avatar file, by extension.
fn avatar_content_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// One line typed in the chat loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    New,
    List,
    /// 1-based position in the session list.
    Open(usize),
    Rename(String),
    Delete,
    Help,
    Quit,
    Message(String),
    Invalid(String),
}

impl ReplCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('/') else {
            return ReplCommand::Message(line.to_string());
        };
        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };
        match name {
            "new" | "nueva" => ReplCommand::New,
            "list" | "lista" => ReplCommand::List,
            "open" | "abrir" => match arg.parse::<usize>() {
                Ok(n) if n > 0 => ReplCommand::Open(n),
                _ => ReplCommand::Invalid("Uso: /open <número>".to_string()),
            },
            "rename" | "renombrar" if !arg.is_empty() => ReplCommand::Rename(arg.to_string()),
            "rename" | "renombrar" => ReplCommand::Invalid("Uso: /rename <título>".to_string()),
            "delete" | "borrar" => ReplCommand::Delete,
            "help" | "ayuda" => ReplCommand::Help,
            "quit" | "exit" | "salir" => ReplCommand::Quit,
            other => ReplCommand::Invalid(format!("Comando desconocido: /{}", other)),
        }
    }
}

const HELP: &str = "\
/new             nueva conversación
/list            lista de conversaciones
/open <n>        abrir la conversación n
/rename <título> renombrar la conversación actual
/delete          borrar la conversación actual
/quit            salir";

fn active_id(state: &ChatState) -> Option<String> {
    match state.view() {
        ViewState::ActiveSession(id) => Some(id.clone()),
        _ => None,
    }
}

async fn repl(controller: &ChatController) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        match ReplCommand::parse(&line) {
            ReplCommand::Quit => break,
            ReplCommand::Help => println!("{}", HELP),
            ReplCommand::Invalid(message) => println!("{}", message),
            ReplCommand::New => {
                controller.new_chat();
                println!("Nueva conversación. Escribe tu consulta.");
            }
            ReplCommand::List => print_sessions(&controller.state()),
            ReplCommand::Open(n) => {
                let id = controller
                    .state()
                    .sessions()
                    .get(n - 1)
                    .map(|s| s.id.clone());
                match id {
                    Some(id) => match controller.select_session(&id) {
                        Ok(()) => print_view(&controller.state()),
                        Err(e) => eprintln!("{}", e),
                    },
                    None => println!("No existe la conversación {}.", n),
                }
            }
            ReplCommand::Rename(title) => match active_id(&controller.state()) {
                Some(id) => match controller.rename_session(&id, &title).await {
                    Ok(()) => println!("Conversación renombrada."),
                    Err(e) => eprintln!("{}", e),
                },
                None => println!("No hay ninguna conversación abierta."),
            },
            ReplCommand::Delete => match active_id(&controller.state()) {
                Some(id) => match controller.delete_session(&id).await {
                    Ok(()) => println!("Conversación borrada."),
                    Err(e) => eprintln!("{}", e),
                },
                None => println!("No hay ninguna conversación abierta."),
            },
            ReplCommand::Message(text) => match controller.send_message(&text).await {
                Ok(outcome) => println!("\n{}\n", outcome.reply),
                Err(e) => eprintln!("{}", e),
            },
        }
    }
    Ok(())
}

fn print_sessions(state: &ChatState) {
    if state.sessions().is_empty() {
        println!("No tienes conversaciones.");
        return;
    }
    let active = active_id(state);
    for (i, session) in state.sessions().iter().enumerate() {
        let marker = if active.as_deref() == Some(session.id.as_str()) {
            "*"
        } else {
            " "
        };
        println!(
            "{}{:>3}. {} ({} mensajes, {})",
            marker,
            i + 1,
            session.title,
            session.message_count(),
            session.updated_at.format("%d/%m/%Y %H:%M")
        );
    }
}

fn print_transcript(session: &ChatSession) {
    println!("== {} ==", session.title);
    for message in &session.messages {
        let who = match message.role {
            Role::User => "Tú",
            Role::Assistant => "Dante",
        };
        let note = match (message.status, message.sync) {
            (MessageStatus::Error, _) => " [error]",
            (_, Some(SyncStatus::Failed)) => " [no guardado]",
            _ => "",
        };
        println!("{}: {}{}", who, message.content, note);
    }
}

fn print_view(state: &ChatState) {
    match state.active_session() {
        Some(session) => print_transcript(session),
        None => println!("Escribe tu consulta para empezar una conversación."),
    }
}
