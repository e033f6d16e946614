mod aggregation;
mod config;
mod errors;
mod gemini;
mod handlers;
mod hubspot;
mod insight;
mod models;
mod orders;

use axum::{
    routing::{get, post},
    Router,
};
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::gemini::GeminiClient;
use crate::hubspot::HubSpotClient;

/// Main entry point for the application.
///
/// Initializes tracing, loads configuration (missing HubSpot token is fatal),
/// builds the upstream clients and caches, wires the HTTP routes and
/// middleware, and serves until SIGINT/SIGTERM.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "breezy_crm_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration; a missing HUBSPOT_ACCESS_TOKEN aborts startup
    let config = Config::from_env()?;

    let hubspot = HubSpotClient::new(
        config.hubspot_base_url.clone(),
        config.hubspot_access_token.clone(),
    )
    .map_err(|e| anyhow::anyhow!("{}", e))?;
    tracing::info!("HubSpot client initialized: {}", config.hubspot_base_url);

    let gemini = match &config.gemini_api_key {
        Some(key) => {
            let client = GeminiClient::new(
                config.gemini_base_url.clone(),
                key.clone(),
                config.gemini_model.clone(),
            )
            .map_err(|e| anyhow::anyhow!("{}", e))?;
            tracing::info!("Gemini client initialized: {}", config.gemini_model);
            Some(client)
        }
        None => None,
    };

    // Stage id -> label map, refreshed on every pipelines fetch.
    // The TTL is a staleness bound; the map is otherwise last-write-wins.
    let stage_labels = Cache::builder()
        .time_to_live(Duration::from_secs(3600))
        .max_capacity(1_000)
        .build();
    tracing::info!("Stage label cache initialized");

    // Short-lived contact listing snapshot backing the autocomplete box
    let contacts_cache = Cache::builder()
        .time_to_live(Duration::from_secs(60))
        .max_capacity(4)
        .build();
    tracing::info!("Contact list cache initialized");

    // Product name -> id memo for the find-or-create step
    let product_cache = Cache::builder()
        .time_to_live(Duration::from_secs(86400))
        .max_capacity(100)
        .build();
    tracing::info!("Product id cache initialized");

    let app_state = Arc::new(handlers::AppState {
        config: config.clone(),
        hubspot,
        gemini,
        stage_labels,
        contacts_cache,
        product_cache,
    });

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .unwrap(),
    );

    // Build protected routes with security layers
    let protected_routes = Router::new()
        .route(
            "/api/contacts",
            get(handlers::list_contacts).post(handlers::create_contact),
        )
        .route(
            "/api/deals",
            get(handlers::list_deals).post(handlers::create_deal),
        )
        .route("/api/pipelines", get(handlers::list_pipelines))
        .route(
            "/api/contacts/:contact_id/deals",
            get(handlers::contact_trial_deals),
        )
        .route(
            "/api/contacts/:contact_id/thermostat-deals",
            get(handlers::contact_thermostat_deals),
        )
        .route(
            "/api/contacts/:contact_id/subscriptions",
            get(handlers::contact_subscriptions),
        )
        .route(
            "/api/contacts/:contact_id/ai-insight",
            post(handlers::contact_ai_insight),
        )
        .layer(
            ServiceBuilder::new()
                // Request size limit: 5MB max payload
                .layer(RequestBodyLimitLayer::new(5 * 1024 * 1024))
                // Rate limiting: 10 req/sec per IP, burst of 20
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    // Health check bypasses rate limiting
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shut down cleanly");
    Ok(())
}

/// Resolves when SIGINT or SIGTERM arrives, triggering graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
