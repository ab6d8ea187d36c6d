use axum::Router;
use clap::Parser;
use common::{AppState, Config};
use database::Database;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Environment from .env, if present
    dotenvy::dotenv().ok();

    // 2. Initialize Logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 3. Load Config from CLI args and env
    let config = Config::parse();

    // 4. Initialize Database
    let db = Database::new(&config.database_url).await?;
    db.run_migrations().await?;

    let state = Arc::new(AppState {
        db,
        config: config.clone(),
    });

    // 5. Routing
    let app = Router::<Arc<AppState>>::new()
        .nest("/credit-card", credit_card::handler::credit_card_router(state.clone()))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    // 6. Start Server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        horizon_months = config.projection_horizon_months,
        "Listening on {}",
        addr
    );
    axum::serve(listener, app).await?;

    Ok(())
}
