use anyhow::{Context, Result};
use dotenv::dotenv;
use std::sync::Arc;

use calorie_estimator::config::EstimatorConfig;
use calorie_estimator::services::{ModelSelectionCache, NutritionEstimator};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logger
    env_logger::init();

    log::info!("🚀 Starting calorie estimator...");

    let config = EstimatorConfig::from_env();
    if !config.is_enabled() {
        log::warn!("⚠️ GEMINI_API_KEY not set, AI estimates are disabled");
    }

    let cache = Arc::new(ModelSelectionCache::default());
    let estimator = NutritionEstimator::new(&config, cache).context("failed to build Gemini client")?;
    log::info!("✅ Estimator initialized ({:?})", config);

    #[cfg(feature = "http-server")]
    {
        use calorie_estimator::config::ServerConfig;
        use calorie_estimator::web::create_router;

        let server_config = ServerConfig::from_env();
        let addr = server_config.bind_addr.clone();
        let app = create_router(Arc::new(estimator), server_config);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;
        log::info!("🌐 HTTP server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                tokio::signal::ctrl_c().await.ok();
            })
            .await
            .context("HTTP server failed")?;

        log::info!("🛑 Shutting down...");
    }

    #[cfg(not(feature = "http-server"))]
    {
        drop(estimator);
        log::warn!("⚠️ Built without the http-server feature, nothing to serve");
    }

    Ok(())
}
