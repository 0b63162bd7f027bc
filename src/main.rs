use std::sync::Arc;
use tracing::{error, info};

mod bus;
mod chat;
mod config;
mod contact;
mod conversation;
mod entity;
mod interface;
mod manager;
mod responder;
mod store;
mod theme;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    if let Err(e) = dotenvy::dotenv() {
        // It's not fatal if .env doesn't exist, but good to know
        info!("No .env file found or failed to load: {}", e);
    }

    // Initialize logging with default filter if RUST_LOG is not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("SoftSell service starting...");

    let config = config::Config::from_env()?;

    let bus = Arc::new(bus::EventBus::new());

    info!("Initializing store at {}", config.database_path.display());
    let store = store::Store::new(&config.database_path).await?;
    store.init().await?;

    let theme = theme::ThemeController::load(Arc::new(store), bus.clone(), config.prefers_dark).await?;

    let manager = Arc::new(manager::Manager::new(
        bus.clone(),
        Arc::new(responder::KeywordResponder),
        config.conversation.clone(),
        theme,
        config.idle_timeout,
    ));

    // Spawn the idle sweeper in the background
    let manager_clone = manager.clone();
    let scheduler_handle = tokio::spawn(async move {
        info!("Starting scheduler...");
        manager_clone.start_scheduler().await;
    });

    let app = interface::http::HttpInterface::new(manager).router();

    info!("Starting HTTP server on port {}", config.port);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = scheduler_handle => {
            error!("Scheduler stopped unexpectedly");
        }
        res = axum::serve(listener, app) => {
            if let Err(e) = res {
                info!("Server stopped with error: {}", e);
            }
        }
    }

    Ok(())
}
