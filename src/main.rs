use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use smokelog_ledger::{CounterScope, Ledger, LedgerConfig};
use smokelog_store::Database;
use smokelog_telemetry::TelemetryConfig;

#[derive(Debug, Parser)]
#[command(name = "smokelog", version, about = "Smoke entry ledger served over HTTP")]
struct Cli {
    /// SQLite database file.
    #[arg(long, env = "SMOKELOG_DB", default_value = "./smokelogger.db")]
    db: PathBuf,

    #[arg(long, env = "SMOKELOG_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "SMOKELOG_PORT", default_value_t = 8080)]
    port: u16,

    /// Origin allowed by CORS. Repeat for several.
    #[arg(long = "allow-origin", default_value = "http://localhost:4200")]
    allow_origins: Vec<String>,

    /// Default log level. RUST_LOG takes precedence when set.
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,

    /// Entries the counter is recomputed over after a delete.
    #[arg(long, default_value = "loaded")]
    counter_scope: CounterScope,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    smokelog_telemetry::init_telemetry(&TelemetryConfig {
        log_level: cli.log_level,
        json: cli.json_logs,
        ..Default::default()
    })?;

    tracing::info!("Starting smokelog");

    let db = Database::open(&cli.db)
        .with_context(|| format!("failed to open database at {}", cli.db.display()))?;
    tracing::info!(path = %cli.db.display(), "Database opened");

    let ledger = Ledger::open(
        db,
        LedgerConfig {
            counter_scope: cli.counter_scope,
        },
    )
    .context("failed to load ledger")?;
    tracing::info!(
        day_id = ledger.active_day_id(),
        counter = ledger.counter(),
        "Ledger loaded"
    );

    let config = smokelog_server::ServerConfig {
        host: cli.host,
        port: cli.port,
        allowed_origins: cli.allow_origins,
    };
    let handle = smokelog_server::start(config, ledger)
        .await
        .context("failed to start server")?;

    tracing::info!(port = handle.port, "smokelog ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("Shutting down");
    handle.shutdown().await;
    Ok(())
}
