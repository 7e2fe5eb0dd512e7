use agro_broker::application::notifier::{mailer_from_config, OutboxDispatcher};
use agro_broker::application::router::build_router;
use agro_broker::application::services::accounts;
use agro_broker::application::state::AppState;
use agro_broker::config::AppConfig;
use agro_broker::persistence::init_database;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agro_broker=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return Err(e.into());
        }
    };
    info!("Starting Agro Broker with {:?}", config);

    let pool = init_database(&config.database).await?;
    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(pool.clone(), config);

    if let Some(admin) = accounts::bootstrap_super_admin(&state).await? {
        info!("Bootstrap super admin '{}' is ready", admin.username);
    }

    // Outbox dispatcher
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mailer = mailer_from_config(&state.config.mail)?;
    let dispatcher = OutboxDispatcher::new(pool.clone(), mailer, state.config.notifier.clone());
    let wake = state.outbox_wake.clone();
    let dispatcher_task = tokio::spawn(async move {
        if let Err(e) = dispatcher.run(shutdown_rx, wake).await {
            error!("Notification dispatcher stopped: {}", e);
        }
    });

    let app = build_router(state);

    info!("Listening on {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    let server = axum::serve(listener, app);

    let shutdown_signal = async move {
        let ctrl_c = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C signal"),
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                    info!("Received SIGTERM signal");
                }
                Err(e) => error!("Failed to install SIGTERM handler: {}", e),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    };

    info!("Server started successfully. Press Ctrl+C to stop.");
    server.with_graceful_shutdown(shutdown_signal).await?;

    info!("Server shutting down gracefully...");
    let _ = shutdown_tx.send(true);
    if let Err(e) = dispatcher_task.await {
        error!("Notification dispatcher task failed: {}", e);
    }
    pool.close().await;

    info!("Shutdown complete");
    Ok(())
}
