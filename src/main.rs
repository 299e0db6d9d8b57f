//! # rollcall
//!
//! Server binary: loads settings, opens the database and serves the
//! HTTP/WebSocket API until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{Roster, SessionStore};
use rollcall_engine::{BroadcastHub, Coordinator};
use rollcall_server::{JwtIdentity, RollcallServer, ServerConfig};
use rollcall_settings::RollcallSettings;
use rollcall_store::{Database, RosterRepo, SqliteSessionStore};
use rollcall_telemetry::{TelemetryConfig, init_telemetry};

/// Live attendance and voting for committee sessions.
#[derive(Parser, Debug)]
#[command(name = "rollcall", about = "Committee attendance and voting server")]
struct Cli {
    /// Settings file (defaults to `~/.rollcall/settings.json`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the server.
    Serve {
        /// Override the configured port.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print an administrator token signed with the configured secret.
    IssueToken {
        /// Subject of the token.
        #[arg(long)]
        username: String,
    },
}

fn load(cli: &Cli) -> Result<RollcallSettings> {
    let settings = match &cli.config {
        Some(path) => rollcall_settings::load_settings_from_path(path),
        None => rollcall_settings::load_settings(),
    };
    settings.context("Failed to load settings")
}

fn identity(settings: &RollcallSettings) -> Result<JwtIdentity> {
    let secret = settings.auth.secret()?;
    Ok(JwtIdentity::new(
        secret.as_bytes(),
        settings.auth.issuer.clone(),
        settings.auth.token_ttl_hours,
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;

    match cli.command {
        Command::IssueToken { username } => {
            let token = identity(&settings)?
                .issue_token(&username)
                .context("Failed to sign token")?;
            println!("{token}");
            Ok(())
        }
        Command::Serve { port } => serve(settings, port).await,
    }
}

async fn serve(settings: RollcallSettings, port: Option<u16>) -> Result<()> {
    let telemetry = init_telemetry(&TelemetryConfig {
        level: settings.logging.level.clone(),
        json: settings.logging.json,
        incident_db: settings.logging.incident_db(),
        incident_retention: settings.logging.incident_retention,
    })
    .context("Failed to initialise logging")?;

    let metrics =
        rollcall_server::metrics::install_recorder().context("Failed to install metrics")?;

    let db = Database::open(&settings.database.path).with_context(|| {
        format!(
            "Failed to open database: {}",
            settings.database.path.display()
        )
    })?;
    let store: Arc<dyn SessionStore> = Arc::new(SqliteSessionStore::new(db.clone()));
    let mut coordinator = Coordinator::new(store, Arc::new(BroadcastHub::new()));
    if settings.roster.enforce {
        let roster: Arc<dyn Roster> = Arc::new(RosterRepo::new(db));
        coordinator = coordinator.with_roster(roster);
        tracing::info!("roster enforcement enabled");
    }

    let identity = identity(&settings)?;

    let mut config = ServerConfig::from(&settings.server);
    if let Some(port) = port {
        config.port = port;
    }
    let mut server =
        RollcallServer::new(config, Arc::new(coordinator), Arc::new(identity), metrics);
    if let Some(incidents) = telemetry.incidents() {
        server = server.with_incidents(incidents);
    }
    let (addr, handle) = server.listen().await.context("Failed to bind listener")?;
    tracing::info!("rollcall listening on http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("shutting down");
    let report = server.stop(handle).await;
    tracing::info!(clean = report.is_clean(), "shutdown complete");
    Ok(())
}
