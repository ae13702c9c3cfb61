mod render;

use anyhow::Result;
use clap::{Parser, Subcommand};
use murmur_core::config::Config;
use murmur_core::notification::ChannelNotifier;
use murmur_core::repository::{SaveMode, TranscriptRepository};
use murmur_core::{Message, Transcript, TranscriptId};
use murmur_orchestration::{SessionManager, SessionOutcome};
use murmur_store::{TranscriptStore, TranscriptWatcher};
use murmur_telemetry::{LogFormat, LogLevel, TelemetryConfig, TelemetrySystem};
use render::DeltaPrinter;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(long, help = "Path to configuration file")]
    config: Option<PathBuf>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(long, help = "Set log level")]
    log_level: Option<LogLevel>,

    /// Set log format (json, pretty, compact)
    #[arg(long, help = "Set log output format")]
    log_format: Option<LogFormat>,

    #[arg(long, help = "Enable logging to files")]
    file_logging: bool,

    #[arg(long, help = "Directory for log files")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List transcripts, newest first
    List,
    /// Print a transcript
    Show {
        /// File name in the chats directory, or a path
        id: String,
    },
    /// Run a streaming completion on a transcript
    Chat {
        /// Transcript to continue; defaults to a new chat from the template
        id: Option<String>,
        /// Append this user message before requesting a reply
        #[arg(short, long)]
        message: Option<String>,
        /// Print the session response as JSON when done
        #[arg(long)]
        json: bool,
    },
    /// Delete a transcript
    Delete { id: String },
    /// Print changes made to a transcript by other programs
    Watch { id: String },
}

/// Create telemetry configuration from CLI arguments
async fn create_telemetry_config(cli: &Cli) -> Result<TelemetryConfig> {
    let mut config = TelemetryConfig::load(None).await?;

    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    if cli.file_logging {
        config.logging.file_enabled = true;
    }
    if let Some(log_dir) = &cli.log_dir {
        config.logging.log_dir = log_dir.clone();
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let telemetry_config = create_telemetry_config(&cli).await?;
    let _telemetry_guard = TelemetrySystem::init(&telemetry_config).map_err(|e| {
        eprintln!("Failed to initialize telemetry system: {}", e);
        anyhow::anyhow!("Telemetry initialization failed: {}", e)
    })?;

    let config = Config::load(cli.config.as_deref()).await.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        anyhow::anyhow!("Failed to load configuration: {}", e)
    })?;

    let store = Arc::new(TranscriptStore::from_config(&config.storage));
    store.ensure_default_template().await.map_err(|e| {
        error!("Failed to prepare chats directory: {}", e);
        anyhow::anyhow!("Failed to prepare chats directory: {}", e)
    })?;

    match cli.command {
        Command::List => list(&store).await,
        Command::Show { id } => show(&store, &store.resolve(&id)).await,
        Command::Chat { id, message, json } => {
            let id = match id {
                Some(name) => store.resolve(&name),
                None => store.default_template(),
            };
            chat(&config, store, id, message, json).await
        }
        Command::Delete { id } => {
            let id = store.resolve(&id);
            store.delete(&id).await?;
            println!("deleted {}", id);
            Ok(())
        }
        Command::Watch { id } => watch(store.resolve(&id)).await,
    }
}

async fn list(store: &TranscriptStore) -> Result<()> {
    let summaries = store.list().await?;
    if summaries.is_empty() {
        println!("no transcripts in {}", store.chats_dir().display());
    }
    for summary in &summaries {
        println!("{}", render::summary_line(summary));
    }
    Ok(())
}

async fn show(store: &TranscriptStore, id: &TranscriptId) -> Result<()> {
    let transcript = match store.load(id).await {
        Ok(transcript) => transcript,
        Err(e) if e.is_load_failure() => {
            warn!(transcript = %id, "Showing error notice: {}", e);
            Transcript::error_notice(&e)
        }
        Err(e) => return Err(e.into()),
    };
    print!("{}", render::transcript_text(&transcript));
    Ok(())
}

async fn chat(
    config: &Config,
    store: Arc<TranscriptStore>,
    mut id: TranscriptId,
    message: Option<String>,
    json: bool,
) -> Result<()> {
    if let Some(text) = message {
        let mut transcript = store.load(&id).await?;
        transcript.push(Message::user(text));
        let saved = store.save(&id, &transcript, SaveMode::Full).await?;
        if saved.forked() {
            info!(from = %id, to = %saved.id, "Started new chat from template");
        }
        id = saved.id;
    }

    let (notifier, mut notifications) = ChannelNotifier::new();
    let manager = Arc::new(SessionManager::from_config(
        config,
        store,
        Arc::new(notifier),
    )?);

    let mut runner = {
        let manager = Arc::clone(&manager);
        let id = id.clone();
        tokio::spawn(async move { manager.start_session(&id).await })
    };

    let mut printer = DeltaPrinter::new(std::io::stdout());
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancelling = false;

    let outcome: SessionOutcome = loop {
        tokio::select! {
            biased;
            Some(notification) = notifications.recv() => printer.print(&notification)?,
            joined = &mut runner => break joined??,
            signal = &mut ctrl_c, if !cancelling => {
                signal?;
                cancelling = true;
                if manager.cancel() {
                    warn!("Cancelling session");
                }
            }
        }
    };

    while let Ok(notification) = notifications.try_recv() {
        printer.print(&notification)?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.response())?);
    } else {
        eprintln!("{}", render::outcome_text(&outcome));
    }

    if outcome.is_success() {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "Session {:?}: {}",
            outcome.status,
            outcome.error.as_deref().unwrap_or("no reply")
        ))
    }
}

async fn watch(id: TranscriptId) -> Result<()> {
    let (_watcher, mut changes) = TranscriptWatcher::watch(id.clone())?;
    println!("watching {} (Ctrl-C to stop)", id);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            change = changes.recv() => {
                let Some(change) = change else { break };
                let transcript = change.result.unwrap_or_else(|e| {
                    warn!(transcript = %change.id, "Changed file could not be read: {}", e);
                    Transcript::error_notice(&e)
                });
                println!("--- {} changed ({} messages)", change.id, transcript.len());
                if let Some(last) = transcript.messages.last() {
                    println!("{}", render::message_lines(last));
                }
            }
            signal = &mut ctrl_c => {
                signal?;
                break;
            }
        }
    }

    info!(transcript = %id, "Stopped watching");
    Ok(())
}
