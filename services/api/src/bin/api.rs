//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{db::DbAdapter, payment::HttpCheckoutAdapter},
    config::Config,
    error::ApiError,
    web::{build_router, expiry_sweeper, ApiDoc, AppState, Stores},
};
use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    HeaderName, HeaderValue, Method,
};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize the Payment Provider ---
    let provider = Arc::new(HttpCheckoutAdapter::new(
        &config.payment_provider_url,
        config.payment_provider_api_key.clone(),
    )?);

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState::new(
        config.clone(),
        Stores {
            tokens: db_adapter.clone(),
            quotas: db_adapter.clone(),
            transactions: db_adapter.clone(),
            catalog: db_adapter,
        },
        provider,
    ));

    // --- 5. Start the Expiry Sweeper ---
    let shutdown = CancellationToken::new();
    let sweeper = tokio::spawn(expiry_sweeper(
        app_state.broker.clone(),
        config.sweep_interval,
        shutdown.clone(),
    ));

    // --- 6. Create the Web Router ---
    let cors_origin = config.cors_origin.parse::<HeaderValue>().map_err(|e| {
        ApiError::Internal(format!("Invalid CORS_ORIGIN '{}': {}", config.cors_origin, e))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(cors_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            ACCEPT,
            HeaderName::from_static("x-admin-key"),
        ])
        .expose_headers([
            HeaderName::from_static("x-first-access"),
            HeaderName::from_static("x-remaining-quota"),
            HeaderName::from_static("x-transaction-id"),
        ]);

    if config.admin_api_key.is_none() {
        info!("ADMIN_API_KEY not set; admin routes are disabled.");
    }

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(build_router(app_state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors);

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received.");
            server_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        tracing::error!("Expiry sweeper ended abnormally: {}", e);
    }
    info!("Server stopped.");
    Ok(())
}
