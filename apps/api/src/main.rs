use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use sokoni_api::config::ApiConfig;
use sokoni_api::provider::mpesa::DarajaGateway;
use sokoni_api::{router, AppState};
use sokoni_db::{Database, DbConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn")),
        )
        .init();

    let config = ApiConfig::load()?;
    info!(bind_addr = %config.bind_addr, "Starting sokoni-api");

    let db = Database::new(DbConfig::new(&config.database_path)).await?;

    let gateway = Arc::new(DarajaGateway::new(config.mpesa.clone()));
    if config.mpesa.is_stub() {
        info!("M-Pesa gateway running in stub mode");
    }

    let state = AppState {
        db,
        config: Arc::new(config.clone()),
        gateway,
    };

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "Listening");
    axum::serve(listener, router(state)).await?;

    Ok(())
}
