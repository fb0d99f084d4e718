use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use universe_hub::config::Config;
use universe_hub::db::Database;
use universe_hub::routes::{self, AppState};
use universe_hub::sync::start_background_refresh;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "universe_hub=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path =
        std::env::var("UNIVERSE_HUB_CONFIG").unwrap_or_else(|_| "universe_hub.toml".to_string());
    let config = Config::load(&config_path)?.with_env_overrides();
    info!(
        "Loaded configuration from {} ({} API tokens)",
        config_path,
        config.auth.tokens.len()
    );

    // Initialize database
    let db = Database::new(&config.database_url).await?;
    db.initialize().await?;
    info!("Database initialized");

    let db = Arc::new(db);
    let bind_addr = config.bind_addr.clone();
    let refresh_interval = config.refresh_interval;

    let state = Arc::new(AppState::new(db.clone(), config)?);

    if refresh_interval > 0 {
        let sync = state.sync.clone();
        tokio::spawn(async move {
            start_background_refresh(sync, refresh_interval).await;
        });
    }

    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Server starting on http://{}", bind_addr);

    axum::serve(listener, app).await?;

    db.close().await;
    Ok(())
}
