//! API server binary.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use clipforge_api::{create_router, ApiConfig, AppState};
use clipforge_events::EventBus;
use clipforge_scheduler::{LogCreditSink, MediaRunner, Scheduler, SchedulerConfig};
use clipforge_store::{Store, StoreConfig};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(
            EnvFilter::from_default_env()
                .add_directive("clipforge=info".parse().expect("valid directive")),
        )
        .init();

    info!("Starting clipforge-api");

    // Initialization order: config, blob/job store, event bus, scheduler,
    // HTTP surface. Teardown reverses it via graceful shutdown.
    let api_config = ApiConfig::from_env();
    let store_config = StoreConfig::from_env();
    let scheduler_config = SchedulerConfig::from_env();

    let store = match Store::open(store_config).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open store: {}", e);
            std::process::exit(1);
        }
    };

    let events = Arc::new(EventBus::new(api_config.event_ring_size));

    let scheduler = Scheduler::new(
        scheduler_config,
        store.clone(),
        Arc::clone(&events),
        Arc::new(MediaRunner::from_env()),
        Arc::new(LogCreditSink),
    );

    let dispatch = scheduler.clone();
    let dispatch_handle = tokio::spawn(async move {
        if let Err(e) = dispatch.run().await {
            error!("Scheduler loop failed: {}", e);
        }
    });

    // Hourly sweep of expired upload sessions.
    let sweeper = store.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(3600));
        loop {
            tick.tick().await;
            if let Err(e) = sweeper.uploads.sweep_expired().await {
                error!("Upload sweep failed: {}", e);
            }
        }
    });

    let state = AppState::new(api_config.clone(), store, events, scheduler.clone());
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", api_config.host, api_config.port)
        .parse()
        .expect("Invalid bind address");
    info!("Listening on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
    }

    scheduler.shutdown();
    let _ = tokio::time::timeout(Duration::from_secs(30), dispatch_handle).await;
    info!("Server shutdown complete");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    info!("Received shutdown signal");
}
