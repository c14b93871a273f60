//! hookci server

use anyhow::Context;
use clap::Parser;
use hookci_api::{AppState, routes};
use hookci_config::{SystemConfig, load_system_config};
use hookci_db::{MemoryStore, PgStore, RepositoryRepo, Store, create_pool, run_migrations};
use hookci_scheduler::{BuildContext, BuildService, Dispatcher};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hookci-server")]
#[command(about = "Private CI build server", long_about = None)]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "HOOKCI_CONFIG", default_value = "hookci.kdl")]
    config: PathBuf,

    /// Address to listen on, overriding the configuration
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut config = load_system_config(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }

    let store = open_store(&config).await?;
    for repository in &config.repositories {
        let repository = store.upsert_repository(repository.clone().into()).await?;
        info!(repository = %repository.name, builds = repository.build_count, "Registered repository");
    }

    let ctx = BuildContext::from_config(store, &config);
    let dispatcher = Arc::new(Dispatcher::from_config(&ctx, &config));
    dispatcher
        .start()
        .await
        .context("failed to start build dispatcher")?;
    info!(dispatcher = dispatcher.name(), parallel_builds = config.parallel_builds, "Dispatcher started");

    let state = AppState::new(BuildService::new(ctx, dispatcher.clone()));
    let app = routes::router(state).layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("failed to listen on {}", config.listen))?;
    info!("Starting server on {}", config.listen);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    dispatcher.shutdown(true).await?;
    info!("Server stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn open_store(config: &SystemConfig) -> anyhow::Result<Arc<dyn Store>> {
    let Some(url) = &config.database_url else {
        info!("No database configured, keeping builds in memory");
        return Ok(Arc::new(MemoryStore::new()));
    };

    info!("Connecting to database...");
    let pool = create_pool(url).await.context("failed to connect to database")?;
    run_migrations(&pool).await.context("failed to run migrations")?;
    info!("Database connected");
    Ok(Arc::new(PgStore::new(pool)))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown requested");
}
