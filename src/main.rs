use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use mimalloc::MiMalloc;
use respostas::config::AppConfig;
use respostas::db::{self, MemoryStore, PgStore};
use respostas::services::delivery::{DeliveryChannel, HttpGatewayChannel, LogChannel};
use respostas::{routes, AppState};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// M-MIMALLOC-APP: Use mimalloc as global allocator for improved performance.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// How long shutdown waits for in-flight runs before leaving them to resume.
const DRAIN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "respostas=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = AppConfig::from_env().context("Failed to load configuration")?;

    let channel: Arc<dyn DeliveryChannel> = match &config.gateway_url {
        Some(url) => Arc::new(
            HttpGatewayChannel::new(url, config.gateway_token.as_deref())
                .context("Failed to build gateway client")?,
        ),
        None => {
            tracing::warn!("GATEWAY_URL not set, deliveries are only logged");
            Arc::new(LogChannel)
        }
    };

    let state = match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url, config.database_max_connections)
                .await
                .context("Failed to connect to database")?;
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("Failed to run migrations")?;
            AppState::new(
                Arc::new(PgStore::new(pool.clone())),
                Some(pool),
                channel,
                config.clone(),
            )
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            AppState::new(Arc::new(MemoryStore::new()), None, channel, config.clone())
        }
    };

    let resumed = state
        .engine
        .resume_incomplete()
        .await
        .context("Failed to resume incomplete runs")?;
    if resumed > 0 {
        tracing::info!(resumed, "Resumed incomplete runs");
    }

    let shutdown = CancellationToken::new();
    let clock = state
        .engine
        .spawn_clock(config.clock_tick(), shutdown.child_token());

    let engine = state.engine.clone();
    let app = routes::build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid BACKEND_HOST/BACKEND_PORT")?;
    tracing::info!(host = %addr, "Starting quick responses API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    clock.await.ok();
    if !engine.drain(DRAIN_GRACE).await {
        tracing::warn!("Shutdown grace elapsed with runs still in flight; they resume on next start");
    }
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutdown signal received"),
        _ = shutdown.cancelled() => {}
    }
}
