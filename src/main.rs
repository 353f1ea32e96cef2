use std::sync::Arc;
use tracing::{error, info, warn};

mod api;
mod bus;
mod chat;
mod config;
mod de;
mod entity;
mod manager;
mod mcp;
mod store;
mod validation;
mod view;

use api::PortalClient;
use config::Config;

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

    info!("Employee portal client starting...");

    let config = Config::from_env()?;

    info!("Initializing store at {}", config.db_path.display());
    let store = store::Store::new(&config.db_path).await?;
    store.init().await?;

    let client = PortalClient::new(&config.api_url, config.http_timeout)?.with_store(store);

    if client.restore_session().await? {
        match client.employee() {
            Some(employee) => info!("Resumed session for {}", employee),
            None => info!("Resumed stored session"),
        }
    } else if let (Some(email), Some(password)) = (&config.email, &config.password) {
        if let Err(e) = client.login(email, password).await {
            error!("Login failed: {}", e);
            anyhow::bail!(e.user_message());
        }
    } else {
        anyhow::bail!("No stored session and PORTAL_EMAIL/PORTAL_PASSWORD are not set");
    }

    let client = Arc::new(client);
    let bus = Arc::new(bus::EventBus::new());
    let manager = Arc::new(manager::Manager::new(
        client.clone(),
        bus.clone(),
        config.read_only,
    ));

    if let Err(e) = manager.load_scheduled_sessions().await {
        warn!("Could not load scheduled sessions: {:#}", e);
    }
    if let Err(e) = manager.load_chats().await {
        warn!("Could not load chats: {:#}", e);
    }

    if let Some(device_token) = &config.device_token {
        match client
            .register_device(device_token, &config.device_platform)
            .await
        {
            Ok(()) => info!("Registered device for notifications"),
            Err(e) => warn!("Device registration failed: {}", e),
        }
    }

    let mcp_server = mcp::server::McpServer::new(manager.clone(), bus.clone());
    let app = mcp_server.router();

    info!("Starting MCP server on port {}", config.port);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        res = axum::serve(listener, app) => {
            if let Err(e) = res {
                error!("Server stopped with error: {}", e);
            }
        }
    }

    if let Some(device_token) = &config.device_token {
        if client.is_authenticated() {
            if let Err(e) = client.unregister_device(device_token).await {
                warn!("Device unregistration failed: {}", e);
            }
        }
    }

    Ok(())
}
