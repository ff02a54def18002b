//! mobile-chat: terminal front end for the chat session.
//!
//! Loads the persisted model choice, starts the session controller, and runs
//! a line-oriented chat on stdin/stdout. Logs go to stderr.

use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use mobile_chat::config::{Cli, Config};
use mobile_chat::console::{self, ConsoleCommand};
use mobile_chat::model::local::LocalModelAdapter;
use mobile_chat::model::variant::ModelVariant;
use mobile_chat::session::{Author, SessionController, SessionError, SessionEvent, SessionState};
use mobile_chat::settings::{JsonFileStore, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "mobile_chat=debug"
    } else {
        "mobile_chat=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    info!("mobile-chat v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let config = Config::load(&cli.config)?;
    let settings_path = cli.settings.clone().unwrap_or_else(|| config.settings.path.clone());

    info!(
        models_dir = %config.model.models_dir.display(),
        allow_download = config.model.allow_download,
        settings = %settings_path.display(),
        "Configuration loaded"
    );

    let startup_variant = cli
        .model
        .as_deref()
        .map(str::parse::<ModelVariant>)
        .transpose()?;

    let settings = Settings::load(Arc::new(JsonFileStore::new(settings_path)));
    let adapter = Arc::new(LocalModelAdapter::new(
        config.model.clone(),
        config.session.system_prompt.clone(),
    ));
    let controller = SessionController::spawn(adapter, settings, &config.session);

    // Subscribe before the first load so no progress is missed.
    let renderer = tokio::spawn(render_events(BroadcastStream::new(controller.events())));

    match startup_variant {
        Some(variant) => controller.select_variant(variant).await?,
        None => controller.begin_load().await?,
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match console::parse_line(&line) {
            ConsoleCommand::Say(text) => match controller.submit_user_text(text).await {
                Ok(_) | Err(SessionError::InvalidInput) => {}
                Err(e) => println!("{}", console::describe_error(&e)),
            },
            ConsoleCommand::Switch(name) => match name.parse::<ModelVariant>() {
                Ok(variant) => {
                    if let Err(e) = controller.select_variant(variant).await {
                        println!("{}", console::describe_error(&e));
                    }
                }
                Err(e) => println!("{e}. Type /models to list them."),
            },
            ConsoleCommand::Retry => {
                if let Err(e) = controller.begin_load().await {
                    println!("{}", console::describe_error(&e));
                }
            }
            ConsoleCommand::ListModels => {
                println!("{}", console::render_models(controller.snapshot().selected));
            }
            ConsoleCommand::Help => println!("{}", console::HELP),
            ConsoleCommand::Unknown(cmd) => println!("Unknown command {cmd}. Type /help."),
            ConsoleCommand::Quit => break,
        }
    }

    drop(controller);
    renderer.abort();
    info!("Goodbye");

    Ok(())
}

/// Print session events as they happen.
async fn render_events(mut events: BroadcastStream<SessionEvent>) {
    let mut stdout = std::io::stdout();
    let mut loading = false;

    while let Some(event) = events.next().await {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                warn!("Renderer fell behind: {e}");
                continue;
            }
        };

        match event {
            SessionEvent::Progress(fraction) => {
                loading = true;
                print!("\r{}", console::format_progress(fraction));
                let _ = stdout.flush();
            }
            SessionEvent::StateChanged(SessionState::Loading { progress }) => {
                loading = true;
                print!("\r{}", console::format_progress(progress));
                let _ = stdout.flush();
            }
            SessionEvent::StateChanged(SessionState::Ready) if loading => {
                loading = false;
                println!("\nModel ready. Type a message, or /help for commands.");
            }
            SessionEvent::StateChanged(SessionState::Failed { .. }) => loading = false,
            SessionEvent::StateChanged(_) => {}
            SessionEvent::TurnAppended(turn) if turn.author == Author::Assistant => {
                println!("{}", console::render_turn(&turn));
            }
            SessionEvent::TurnAppended(_) => {}
            SessionEvent::TranscriptCleared => println!("(conversation cleared)"),
            SessionEvent::Failed(e) => println!("\n{}", console::describe_error(&e)),
            SessionEvent::StaleResultDiscarded { .. } => {}
        }
    }
}
