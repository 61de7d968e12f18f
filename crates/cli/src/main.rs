//! Murmur CLI.
//!
//! Replays recorded push traffic through a chat store with offline
//! collaborators and prints the resulting snapshot, and inspects the
//! effective configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use murmur_core::config::{self, Config};
use murmur_core::event::{BroadcastEventBus, Channel, Event, EventPayload, EventSource};
use murmur_store::{ChatSnapshot, ChatStore, SocketCommand};

mod offline;
mod replay;

use offline::{OfflineApi, RecordingTransport};

/// Murmur - chat state reconciliation toolkit
#[derive(Parser)]
#[command(name = "murmur")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed a JSON Lines recording of push events through the store
    Replay {
        /// Recording to replay
        file: PathBuf,

        /// Local user id, announced as a connection before the first event
        #[arg(short, long)]
        user: Option<String>,

        /// Conversation to hold open while replaying
        #[arg(short, long)]
        open: Option<String>,
    },
    /// Print the configuration path and the effective settings
    Config,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplayReport<'a> {
    events: usize,
    snapshot: &'a ChatSnapshot,
    emitted: Vec<SocketCommand>,
}

fn init_tracing(config: &Config, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn load_config(path: Option<&Path>) -> Result<(PathBuf, Config)> {
    let path = path.map_or_else(config::config_path, Path::to_path_buf);
    let config = config::load_config_from(&path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    Ok((path, config))
}

/// What a replay left behind.
struct ReplayOutcome {
    snapshot: Arc<ChatSnapshot>,
    emitted: Vec<SocketCommand>,
}

async fn run_replay(
    config: &Config,
    events: &[Event],
    user: Option<String>,
    open: Option<String>,
) -> Result<ReplayOutcome> {
    let transport = Arc::new(RecordingTransport::default());
    let bus = Arc::new(BroadcastEventBus::new(config.event_bus.channel_capacity));
    let store = ChatStore::new(
        Arc::new(OfflineApi),
        Arc::clone(&transport),
        bus,
        config.sync.clone(),
    );

    if let Some(user_id) = user {
        let payload = EventPayload::ConnectionEstablished {
            user_id: Some(user_id),
        };
        let channel = Channel::new(payload.channel_name())?;
        store.handle_event(&Event::new(channel, EventSource::Replay, payload))?;
    }
    if let Some(chat_id) = open {
        // History is unavailable offline; the thread still opens.
        if let Err(e) = store.open_conversation(&chat_id).await {
            debug!(chat_id = %chat_id, error = %e, "opened without history");
        }
    }

    for event in events {
        if let Err(e) = store.handle_event(event) {
            warn!(channel = %event.channel, error = %e, "event could not be applied");
        }
    }

    Ok(ReplayOutcome {
        snapshot: store.snapshot(),
        emitted: transport.emitted(),
    })
}

async fn replay(
    config: Config,
    file: PathBuf,
    user: Option<String>,
    open: Option<String>,
) -> Result<()> {
    let contents = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let events = replay::parse_recording(&contents)
        .with_context(|| format!("failed to parse {}", file.display()))?;
    info!(path = %file.display(), events = events.len(), "replaying recording");

    let outcome = run_replay(&config, &events, user, open).await?;
    let report = ReplayReport {
        events: events.len(),
        snapshot: &outcome.snapshot,
        emitted: outcome.emitted,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn show_config(path: &Path, config: &Config) -> Result<()> {
    println!("# {}", path.display());
    print!(
        "{}",
        toml::to_string_pretty(config).context("failed to render configuration")?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (path, config) = load_config(cli.config.as_deref())?;
    init_tracing(&config, cli.json_logs);
    debug!(path = %path.display(), "configuration loaded");

    match cli.command {
        Commands::Replay { file, user, open } => replay(config, file, user, open).await,
        Commands::Config => show_config(&path, &config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORDING: &str = r#"
# u2 writes into the open conversation, then into another one
{"event":"message","data":{"_id":"m1","chat":"c1","sender":"u2","content":"hey"}}
{"event":"message","data":{"_id":"m2","chat":"c2","sender":"u3","content":"yo"}}
{"event":"messages-seen","data":{"chatId":"c1"}}
"#;

    #[tokio::test]
    async fn replay_folds_events_into_the_snapshot() {
        let events = replay::parse_recording(RECORDING).unwrap();
        let outcome = run_replay(
            &Config::default(),
            &events,
            Some("me".into()),
            Some("c1".into()),
        )
        .await
        .unwrap();

        let snapshot = &outcome.snapshot;
        assert!(snapshot.connected);
        assert!(snapshot.is_active("c1"));
        assert_eq!(snapshot.active.as_ref().unwrap().messages.len(), 1);
        assert_eq!(snapshot.conversations.get("c1").unwrap().unread, 0);
        assert_eq!(snapshot.conversations.get("c2").unwrap().unread, 1);

        let names: Vec<&str> = outcome.emitted.iter().map(SocketCommand::name).collect();
        assert_eq!(
            names,
            ["join", "mark-read", "mark-delivered", "mark-read", "mark-delivered"]
        );
    }

    #[tokio::test]
    async fn replay_without_a_user_still_applies_events() {
        let events = replay::parse_recording(RECORDING).unwrap();
        let outcome = run_replay(&Config::default(), &events, None, None)
            .await
            .unwrap();
        assert!(!outcome.snapshot.connected);
        assert_eq!(outcome.snapshot.conversations.len(), 2);
    }

    #[test]
    fn config_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let (loaded_from, config) = load_config(Some(&path)).unwrap();
        assert_eq!(loaded_from, path);
        assert!(path.exists());
        assert_eq!(config.sync.typing_idle_secs, 2);
    }
}
