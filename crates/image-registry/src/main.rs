//! Golden Image Registry Service
//!
//! REST API for recording golden image builds and selecting the latest
//! valid image per environment

use anyhow::{Context, Result};
use image_registry::{create_router, AppState, Config, Storage};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "image_registry=debug,image_selector=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    let policy = config.policy();

    info!("Starting Golden Image Registry");
    info!("Required tags: {}", config.required_tags.join(", "));
    info!("Required state: {}", config.required_state);
    if let Some(days) = config.max_image_age_days {
        info!("Maximum image age: {} days", days);
    }

    let state = match &config.redis_url {
        Some(redis_url) => {
            info!("Redis URL: {}", redis_url);
            let mut storage = Storage::new(redis_url)
                .await
                .context("Failed to initialize storage")?;
            let records = storage
                .load_all()
                .await
                .context("Failed to load image history")?;

            let state = AppState::with_storage(policy, storage);
            state.selector.restore(records).await;
            state
        }
        None => {
            info!("REDIS_URL not set, history is kept in memory only");
            AppState::new(policy)
        }
    };

    let app = create_router(state);

    // Bind and serve
    let addr = config.address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    info!("Golden Image Registry running on http://{}", addr);

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}
