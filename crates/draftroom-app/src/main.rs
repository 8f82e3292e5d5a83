// draftroom entry point.
//
// `draftroom host` startup sequence:
// 1. Initialize tracing (log to file, not terminal)
// 2. Load config (copying missing files from defaults/)
// 3. Open database, load the catalog and compile formats
// 4. Resume the hosted draft or create a new one
// 5. Open the authoritative session
// 6. Spawn the WebSocket server task
// 7. Run the host event loop until interrupted
//
// `draftroom join` connects to a host and drives a participant from stdin.

mod app;
mod protocol;
mod remote;
mod ws_server;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use draftroom_core::catalog::{Catalog, FormatResolver};
use draftroom_core::config::{self, SyncConfig};
use draftroom_core::draft::room::JoinRequest;
use draftroom_core::repository::{DraftRepository, SqliteRepository};
use draftroom_core::session::DraftSession;

#[derive(Debug, Parser)]
#[command(name = "draftroom", version, about = "Host or join a Pokemon draft")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Host the configured draft and serve participants over WebSocket.
    Host {
        /// Display name of the hosting participant.
        #[arg(long, default_value = "Host")]
        name: String,
        /// Team to draft with; omit to only run the room.
        #[arg(long)]
        team: Option<String>,
    },
    /// Join a hosted draft.
    Join {
        /// Host address, e.g. ws://192.168.1.20:9010
        url: String,
        /// Six-character room code announced by the host.
        room: String,
        #[arg(long)]
        name: String,
        /// Stable id used to rejoin as the same participant.
        #[arg(long)]
        user: Option<String>,
        /// Team to create; omit to spectate.
        #[arg(long)]
        team: Option<String>,
        #[arg(long)]
        password: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 1. Initialize tracing (log to file, not terminal)
    init_tracing()?;
    info!("draftroom starting up");

    match cli.command {
        Command::Host { name, team } => host(name, team).await,
        Command::Join {
            url,
            room,
            name,
            user,
            team,
            password,
        } => {
            let request = JoinRequest {
                user_id: user.unwrap_or_else(|| name.to_lowercase()),
                display_name: name,
                team_name: team,
                password,
            };
            let sync = match config::load_config() {
                Ok(config) => config.sync,
                Err(e) => {
                    warn!("Using default sync settings: {}", e);
                    SyncConfig::default()
                }
            };
            remote::run(remote::JoinOptions {
                url,
                room_code: room,
                request,
                sync,
            })
            .await
        }
    }
}

async fn host(name: String, team: Option<String>) -> anyhow::Result<()> {
    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: draft='{}', format={}, {} mode, {} teams, budget {}",
        config.draft.name,
        config.draft.format,
        config.draft.mode,
        config.draft.max_teams,
        config.draft.budget_per_team
    );

    // 3. Open database, load the catalog and compile formats
    let repo = Arc::new(SqliteRepository::open(&config.server.db_path).context("failed to open database")?);
    info!("Database opened at {}", config.server.db_path);

    let catalog = Catalog::load(Path::new(&config.server.catalog_path))
        .with_context(|| format!("failed to load catalog from {}", config.server.catalog_path))?;
    info!("Loaded {} catalog items", catalog.len());
    let resolver = Arc::new(FormatResolver::with_formats(
        Arc::new(catalog),
        config.formats.clone(),
    ));

    // 4. Resume the hosted draft or create a new one
    let draft_id = app::open_or_create_draft(&repo, &config, &name, team).await?;

    // 5. Open the authoritative session. The fan-out feed is subscribed
    // before anything can commit.
    let feed = repo.subscribe();
    let dyn_repo: Arc<dyn DraftRepository> = repo.clone();
    let session = DraftSession::open(&draft_id, dyn_repo, resolver, config.sync.session_settings())
        .await
        .context("failed to open draft session")?;
    if let Some(draft) = session.store().draft() {
        println!(
            "Hosting '{}' ({} draft, {}). Room code: {}",
            draft.name, draft.mode, draft.status, draft.room_code
        );
    }

    // 6. Spawn the WebSocket server task
    let (ws_tx, ws_rx) = mpsc::channel(256);
    let port = config.server.port;
    let ws_handle = tokio::spawn(async move {
        if let Err(e) = ws_server::run(port, ws_tx).await {
            error!("WebSocket server error: {}", e);
        }
    });
    println!("Listening on ws://0.0.0.0:{port} (Ctrl+C to stop)");

    // 7. Run the host event loop until interrupted
    let state = app::HostState::new(session, config.sync.heartbeat_interval());
    let result = app::run(ws_rx, feed, state).await;

    ws_handle.abort();
    match &result {
        Ok(()) => info!("draftroom host shut down cleanly"),
        Err(e) => error!("Host loop error: {:#}", e),
    }
    result
}

/// Initialize tracing to log to a file, keeping the terminal for the board.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("draftroom.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("draftroom=info,draftroom_core=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
