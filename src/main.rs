use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use kbchat::app::{AppConfig, AppPaths};
use kbchat::auth::EnvTokenProvider;
use kbchat::chat::{
    ChatResult, ChatService, Conversation, EndpointFallback, StreamObserver,
};
use kbchat::cli::{Cli, Commands};

/// Prints streamed text incrementally, tracking the cumulative snapshot
/// already on screen so each update only emits the new suffix.
struct StdoutObserver {
    printed: String,
}

impl StdoutObserver {
    fn new() -> Self {
        Self {
            printed: String::new(),
        }
    }
}

impl StreamObserver for StdoutObserver {
    fn on_stream_data(&mut self, text: &str) {
        if let Some(suffix) = text.strip_prefix(self.printed.as_str()) {
            print!("{}", suffix);
            let _ = std::io::stdout().flush();
            self.printed = text.to_string();
        }
    }

    fn on_complete(&mut self, text: &str) {
        match text.strip_prefix(self.printed.as_str()) {
            Some(suffix) => println!("{}", suffix),
            None => {
                // The final text replaced the streamed prefix; reprint whole.
                println!();
                println!("{}", text);
            }
        }
        self.printed = text.to_string();
    }

    fn on_error(&mut self, message: &str) {
        if !self.printed.is_empty() {
            println!();
        }
        eprintln!("error: {}", message);
    }
}

async fn load_config(cli: &Cli, paths: &AppPaths) -> anyhow::Result<AppConfig> {
    match &cli.config {
        Some(path) => AppConfig::load_from(Path::new(path))
            .await
            .with_context(|| format!("failed to load config from {}", path)),
        None => AppConfig::load(paths)
            .await
            .context("failed to load configuration"),
    }
}

async fn run_ask(
    config: &AppConfig,
    message: &str,
    session: Option<String>,
    knowledge: Vec<String>,
    online: bool,
    user: Option<String>,
    use_fallback: bool,
) -> anyhow::Result<ChatResult> {
    let token_provider = Arc::new(EnvTokenProvider::new(config.api.token_env_var.clone()));
    let service = ChatService::new(config.to_service_config(), token_provider)?;

    let knowledge_ids = if knowledge.is_empty() {
        config.chat.knowledge_ids.clone()
    } else {
        knowledge
    };

    let mut conversation = Conversation::new(user.unwrap_or_else(|| config.chat.user_id.clone()))
        .with_knowledge_ids(knowledge_ids)
        .with_online_mode(online || config.chat.online_mode);
    if let Some(session_id) = session {
        conversation = conversation.with_session(session_id);
    }

    let mut observer = StdoutObserver::new();

    let result = if use_fallback && config.fallback.enabled {
        let mut fallback =
            EndpointFallback::new(config.endpoints(), config.to_fallback_config());
        let (result, attempts) = fallback
            .send_message(&service, &mut conversation, message, &mut observer)
            .await?;
        info!("Resolved after {} endpoint attempt(s)", attempts.len());
        result
    } else {
        service
            .send_message(&mut conversation, message, &mut observer)
            .await?
    };

    if let Some(session_id) = &result.session_id {
        eprintln!("session: {}", session_id);
    }
    info!("Answer took {}ms", result.response_time_ms);
    Ok(result)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let directive = if cli.debug { "kbchat=debug" } else { "kbchat=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(directive.parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    let paths = AppPaths::new()?;
    paths.ensure_dirs_exist()?;

    match cli.command {
        Commands::Ask {
            ref message,
            ref session,
            ref knowledge,
            online,
            ref user,
            fallback,
        } => {
            let config = load_config(&cli, &paths).await?;
            let result = run_ask(
                &config,
                message,
                session.clone(),
                knowledge.clone(),
                online,
                user.clone(),
                fallback,
            )
            .await?;
            if !result.success {
                std::process::exit(1);
            }
        }
        Commands::Config { init } => {
            let config = load_config(&cli, &paths).await?;
            if init {
                config.save(&paths).await?;
            }
            println!("config file: {}", paths.config_file().display());
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
