use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use holded_sync::api::{self, AppState};
use holded_sync::config::LockBackend;
use holded_sync::db::{self, PgInvoiceStore, PgRunLedger, PgSyncStateStore};
use holded_sync::holded::HoldedClient;
use holded_sync::lock::{MemoryLock, PgLock, ProcessLock};
use holded_sync::models::RunMode;
use holded_sync::service::orchestrator::parse_window_bound;
use holded_sync::service::SyncSettings;
use holded_sync::{create_pool, AppConfig, RunArgs, SyncOrchestrator};
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "holded-sync", about = "Incremental Holded invoice sync")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP trigger endpoints.
    Serve,
    /// Run one incremental import, print the report as JSON and exit.
    RunOnce {
        #[arg(long, env = "LIMIT")]
        limit: Option<u32>,
        /// Lower window bound (RFC 3339 or YYYY-MM-DD).
        #[arg(long, env = "SINCE", value_parser = parse_window_bound)]
        since: Option<chrono::DateTime<chrono::Utc>>,
        /// Upper window bound (RFC 3339 or YYYY-MM-DD).
        #[arg(long, env = "UNTIL", value_parser = parse_window_bound)]
        until: Option<chrono::DateTime<chrono::Utc>>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = AppConfig::load()?;

    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_target(true)
        .with_level(true)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!(
        api_base = %config.holded.api_base,
        lock_backend = ?config.sync.lock_backend,
        "configuration loaded"
    );

    let pool = create_pool(&config.database.url, config.database.max_connections).await?;
    info!("Database pool created");
    if config.database.run_migrations {
        db::run_migrations(&pool).await?;
    }

    let lock: Arc<dyn ProcessLock> = match config.sync.lock_backend {
        LockBackend::Memory => Arc::new(MemoryLock::new()),
        LockBackend::Postgres => Arc::new(PgLock::new(pool.clone())),
    };

    let orchestrator = Arc::new(SyncOrchestrator::new(
        HoldedClient::new(config.holded.clone())?,
        Arc::new(PgInvoiceStore::new(pool.clone())),
        Arc::new(PgSyncStateStore::new(pool.clone())),
        Arc::new(PgRunLedger::new(pool)),
        lock,
        SyncSettings::from(&config.sync),
    ));

    match cli.command {
        Command::Serve => {
            let app = api::build_router(AppState {
                orchestrator,
                internal_bearer: config.server.internal_bearer.clone(),
            });

            let addr = config.bind_addr();
            info!("Server listening on {}", addr);
            info!("  GET|POST /api/holded/invoices/import-incremental");
            info!("  GET      /api/holded/sync/last-run");

            let listener = tokio::net::TcpListener::bind(&addr).await?;
            axum::serve(listener, app).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::RunOnce { limit, since, until } => {
            let args = RunArgs {
                limit,
                since,
                until,
                ..RunArgs::new(RunMode::IncrementalCli)
            };
            let report = orchestrator.run(args).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(if report.ok {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}
