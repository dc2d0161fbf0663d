use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};
use waitline_api::{app, AppState};
use waitline_service::{config::Config, run_migrations, store::PartyStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let config = Config::load();
    run_migrations().await?;

    let redis_client = redis::Client::open(config.redis_url())?;
    let redis = redis_client.get_connection_manager().await?;

    let state = AppState {
        store: PartyStore::new(&config),
        config: config.clone(),
        redis,
        redis_client,
    };

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("waitline API listening on {}", listener.local_addr()?);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
