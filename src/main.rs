//! Parking tracker service

use std::sync::Arc;

use parking_tracker::{
    config::AppConfig,
    database::{Database, MemorySpotStore, SpotStore},
    errors::TrackerError,
    mqtt::{run_uplink_subscriber, MqttClientBuilder},
    routes::{build_router, AppState},
};
use tokio::{net::TcpListener, signal};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), TrackerError> {
    #[cfg(feature = "dotenvy")]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Configuration file first, then PARKING__* environment variables
    let config = AppConfig::load()?;
    config.validate()?;

    let store: Arc<dyn SpotStore> = match &config.database {
        Some(database) => Arc::new(Database::connect(database).await?),
        None => {
            warn!("No database configured, spot state is kept in memory only");
            Arc::new(MemorySpotStore::new())
        }
    };

    if let Some(mqtt) = &config.mqtt {
        let mqtt_client = MqttClientBuilder::new(mqtt)?.connect(&mqtt.topics).await?;
        let store = store.clone();
        tokio::spawn(async move {
            if let Err(e) = run_uplink_subscriber(mqtt_client, store).await {
                error!("Uplink subscriber stopped: {}", e);
            }
        });
    }

    let listener = TcpListener::bind(config.server.listen_addr).await?;
    info!(addr = %config.server.listen_addr, "Listening for HTTP requests");

    axum::serve(listener, build_router(AppState::new(store)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
