mod analysis;
mod capability;
mod config;
mod db;
mod errors;
mod extraction;
mod models;
mod quota;
mod resilience;
mod routes;
mod scoring;
mod state;
mod streaming;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::analysis::error_log::{ErrorLog, PgErrorLog, TracingErrorLog};
use crate::analysis::Orchestrator;
use crate::capability::HttpCapability;
use crate::config::Config;
use crate::db::create_pool;
use crate::quota::ledger::{MemoryUsageLedger, RedisUsageLedger, UsageLedger};
use crate::quota::QuotaGate;
use crate::resilience::{BreakerEvent, QueueEvent};
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ATScore API v{}", env!("CARGO_PKG_VERSION"));

    // Usage ledger: Redis when configured, otherwise process memory
    let ledger: Arc<dyn UsageLedger> = match &config.redis_url {
        Some(url) => {
            let ledger = RedisUsageLedger::connect(url)
                .await
                .context("Failed to connect to Redis")?;
            info!("Redis usage ledger initialized");
            Arc::new(ledger)
        }
        None => {
            warn!("REDIS_URL not set; usage is tracked in memory and lost on restart");
            Arc::new(MemoryUsageLedger::new())
        }
    };

    // Error log: Postgres when configured, otherwise tracing only
    let error_log: Arc<dyn ErrorLog> = match &config.database_url {
        Some(url) => Arc::new(PgErrorLog::new(create_pool(url).await?).await?),
        None => {
            warn!("DATABASE_URL not set; analysis errors are only logged");
            Arc::new(TracingErrorLog)
        }
    };

    let capability = HttpCapability::new(
        config.capability_url.clone(),
        config.capability_api_key.clone(),
    )
    .context("Failed to build scoring capability client")?;
    info!("Scoring capability client initialized ({})", config.capability_url);

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(capability),
        QuotaGate::new(ledger),
        error_log,
        config.orchestrator_config(),
    ));
    spawn_event_logger(&orchestrator);

    // Build app state
    let state = AppState { orchestrator };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Logs circuit breaker transitions and queue activity until both channels close.
fn spawn_event_logger(orchestrator: &Orchestrator) {
    let mut breaker_events = orchestrator.breaker().subscribe();
    let mut queue_events = orchestrator.queue().subscribe();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = breaker_events.recv() => match event {
                    Ok(BreakerEvent::Opened) => warn!("Scoring circuit opened; remote calls suspended"),
                    Ok(BreakerEvent::HalfOpened) => info!("Scoring circuit half-open; probing remote"),
                    Ok(BreakerEvent::Closed) => info!("Scoring circuit closed"),
                    Ok(BreakerEvent::Rejected) => debug!("Call rejected by open scoring circuit"),
                    Err(RecvError::Lagged(n)) => warn!("Event logger skipped {n} breaker events"),
                    Err(RecvError::Closed) => break,
                },
                event = queue_events.recv() => match event {
                    Ok(QueueEvent::Active) => debug!("Request queue active"),
                    Ok(QueueEvent::Idle) => debug!("Request queue idle"),
                    Err(RecvError::Lagged(n)) => warn!("Event logger skipped {n} queue events"),
                    Err(RecvError::Closed) => break,
                },
            }
        }
    });
}
