// Campus Match - Web Server
// REST API with Axum over the shared SQLite ledger

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use campus_match::api::{router, AppState};
use campus_match::{Config, HmacTokenVerifier, MatchService};

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter.as_str()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_logging(&config);

    let secret = config.require_token_secret()?;
    let verifier = HmacTokenVerifier::new(secret);

    let service = MatchService::from_config(&config)
        .with_context(|| format!("opening database at {}", config.database_path.display()))?;
    info!(
        database = %config.database_path.display(),
        allowance = config.coin_allowance,
        utc_offset_hours = config.utc_offset_hours,
        "ledger ready"
    );

    let app = router(AppState::new(service, Arc::new(verifier)));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;

    info!("🚀 Campus Match server listening on http://{}", config.bind_addr);
    println!("📡 API endpoints:");
    println!("   GET    /api/health");
    println!("   GET    /api/me");
    println!("   PUT    /api/me/profile");
    println!("   GET    /api/matching-cards");
    println!("   POST   /api/matching-cards");
    println!("   DELETE /api/matching-cards");
    println!("   GET    /api/cards/:cardId");
    println!("   POST   /api/cards/:cardId/reveal");
    println!("   GET    /api/notifications");
    println!("   PUT    /api/notifications/:id/read");
    println!("   GET    /api/admin/users");
    println!("   DELETE /api/admin/users/:userId");
    println!("   GET    /api/admin/cards");
    println!("   GET    /api/admin/cards/:cardId/reveals");
    println!("   DELETE /api/admin/cards/:cardId");

    axum::serve(listener, app).await?;

    Ok(())
}
