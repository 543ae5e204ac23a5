//! Agora API server binary.
//!
//! Serves the account and session endpoints over HTTP, backed by PostgreSQL
//! or, with `--in-memory`, by process-local stores.

use std::sync::Arc;
use std::time::Duration;

use agora_core::auth::accounts::MemoryAccountDirectory;
use agora_core::auth::ledger::MemoryRefreshLedger;
use agora_core::auth::queries::{PgAccountDirectory, PgRefreshLedger, PgResetCodeStore};
use agora_core::auth::reset_codes::MemoryResetCodeStore;
use agora_core::auth::session::{SessionService, SessionStores};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

/// CLI arguments for the API server.
#[derive(Parser, Debug)]
#[command(name = "agora_api_server", about = "Agora API server")]
struct Args {
    /// Port to listen on. Overrides the port in `BIND_ADDR`.
    #[arg(long)]
    port: Option<u16>,

    /// PostgreSQL connection URL.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 5)]
    max_connections: u32,

    /// Keep all state in memory. Nothing survives a restart.
    #[arg(long, default_value_t = false)]
    in_memory: bool,

    /// Seconds between expired-record purges (0 disables).
    #[arg(long, default_value_t = 3600)]
    purge_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,agora_api=debug,agora_core=debug")
            }),
        )
        .init();

    let args = Args::parse();

    let mut config = agora_api::config::ApiConfig::from_env()?;
    if let Some(url) = args.database_url {
        config.database_url = url;
    }
    if let Some(port) = args.port {
        config.bind_addr = with_port(&config.bind_addr, port);
    }

    info!(bind_addr = %config.bind_addr, in_memory = args.in_memory, "starting agora_api_server");
    info!(config = ?config, "loaded configuration");

    let stores = if args.in_memory {
        warn!("in-memory stores: accounts and sessions are lost on restart");
        memory_stores(&config)?
    } else {
        info!(max_connections = args.max_connections, "configuring connection pool");
        let pool = PgPoolOptions::new()
            .max_connections(args.max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&config.database_url)
            .await?;

        info!("running database migrations");
        agora_core::migrate::migrate(&pool).await?;

        SessionStores {
            accounts: Arc::new(PgAccountDirectory::new(pool.clone())),
            ledger: Arc::new(PgRefreshLedger::new(pool.clone())),
            reset_codes: Arc::new(PgResetCodeStore::new(pool)),
            dispatcher: config.dispatcher()?,
        }
    };

    let sessions = Arc::new(config.session_service(stores)?);

    if sessions
        .ensure_root_bootstrap(&config.root_email, config.root_password.as_deref())
        .await?
    {
        info!(email = %config.root_email, "root account created");
    }

    if args.purge_interval_secs > 0 {
        spawn_purge_task(sessions.clone(), Duration::from_secs(args.purge_interval_secs));
    }

    let state = agora_api::AppState { sessions };
    let app = agora_api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "REST API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    Ok(())
}

fn memory_stores(
    config: &agora_api::config::ApiConfig,
) -> Result<SessionStores, Box<dyn std::error::Error>> {
    Ok(SessionStores {
        accounts: Arc::new(MemoryAccountDirectory::new()),
        ledger: Arc::new(MemoryRefreshLedger::new()),
        reset_codes: Arc::new(MemoryResetCodeStore::new()),
        dispatcher: config.dispatcher()?,
    })
}

/// Periodically drops expired reset codes and refresh token records.
fn spawn_purge_task(sessions: Arc<SessionService>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match sessions.purge_expired().await {
                Ok(report) => info!(
                    reset_codes = report.reset_codes,
                    refresh_tokens = report.refresh_tokens,
                    "purged expired records"
                ),
                Err(e) => warn!(error = %e, "purge of expired records failed"),
            }
        }
    });
}

/// Replaces the port in a `host:port` bind address.
fn with_port(bind_addr: &str, port: u16) -> String {
    let host = bind_addr
        .rsplit_once(':')
        .map(|(host, _)| host)
        .unwrap_or(bind_addr);
    format!("{host}:{port}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_flag_overrides_bind_addr_port() {
        assert_eq!(with_port("127.0.0.1:3100", 8080), "127.0.0.1:8080");
        assert_eq!(with_port("0.0.0.0:0", 1), "0.0.0.0:1");
        assert_eq!(with_port("localhost", 9000), "localhost:9000");
    }

    #[test]
    fn args_defaults() {
        let args = Args::parse_from(["agora_api_server"]);
        assert_eq!(args.max_connections, 5);
        assert_eq!(args.purge_interval_secs, 3600);
        assert!(!args.in_memory);
    }
}
