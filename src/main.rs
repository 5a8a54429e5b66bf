/// Log Classification Service
///
/// Accepts a CSV upload of (source, log_message) rows, labels every row with
/// the rule matcher and the LLM fallback, and returns the labeled CSV.
/// Port: 8000
use anyhow::Context;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use log_classifier::config::ServiceConfig;
use log_classifier::server::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (fails silently if not found)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("❌ Configuration error: {:#}", e);
            error!("💡 Relevant environment variables:");
            error!("   - LLM_PROVIDER: groq (default), openai, anthropic or ollama");
            error!("   - LLM_API_KEY / GROQ_API_KEY: credential for hosted providers");
            error!("   - LLM_MODEL, LLM_ENDPOINT, LLM_TIMEOUT_SECS (optional)");
            error!("   - FALLBACK_CHUNK_SIZE, FALLBACK_MAX_CONCURRENCY, FALLBACK_MAX_ATTEMPTS (optional)");
            error!("   - RULES_FILE, OUTPUT_PATH, CLASSIFY_BIND_ADDR (optional)");
            std::process::exit(1);
        }
    };

    config.log_config();

    let state = Arc::new(AppState::from_config(&config)?);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;

    info!("🚀 Log Classification Service listening on {}", config.bind_addr);
    info!("📊 Endpoints:");
    info!("   GET  /health      - Health check");
    info!("   POST /classify/   - Upload a CSV (multipart field 'file') and get it back labeled");

    axum::serve(listener, app).await?;

    Ok(())
}
