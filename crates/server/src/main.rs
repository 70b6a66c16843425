use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cartrunner_core::{
    load_config, validate_config, CaptchaBroker, CheckoutGateway, Collaborators, Config,
    HttpGateway, HttpParserFactory, ManagerSettings, Notifier, ParserFactory, ProxyPool,
    StorefrontForms, TaskManager, WebhookNotifier,
};

use cartrunner_server::api::create_router;
use cartrunner_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("CARTRUNNER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(
        "cartrunner {} starting (config {}, {} known sites)",
        VERSION,
        &config_hash[..16],
        config.sites.len()
    );

    let manager = build_manager(&config).await;

    let state = Arc::new(AppState::new(config.clone(), manager.clone()));
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down, aborting runners...");
    manager.shutdown().await;
    info!("Task manager stopped");

    Ok(())
}

/// Wire the task manager to the HTTP-backed collaborators.
async fn build_manager(config: &Config) -> TaskManager {
    let pool = Arc::new(ProxyPool::new(config.proxies.clone()));
    let registered = pool.register_all(&config.proxies.list[..]).await;
    if registered < config.proxies.list.len() {
        warn!(
            "Registered {} of {} configured proxies",
            registered,
            config.proxies.list.len()
        );
    } else {
        info!("Registered {} proxies", registered);
    }

    let request_timeout = config.runner.request_timeout();
    let parsers: Arc<dyn ParserFactory> = Arc::new(HttpParserFactory::new(Duration::from_millis(
        config.monitor.parser_timeout_ms,
    )));
    let gateway: Arc<dyn CheckoutGateway> =
        Arc::new(HttpGateway::new(Box::new(StorefrontForms), request_timeout));
    let notifier: Arc<dyn Notifier> = Arc::new(WebhookNotifier::new(request_timeout));

    let parts = Collaborators {
        pool,
        broker: Arc::new(CaptchaBroker::default()),
        parsers,
        gateway,
        notifier: Some(notifier),
    };
    TaskManager::new(ManagerSettings::from(config), parts)
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
