//! Concierge Gateway - HTTP/WebSocket consultation routing
//!
//! This is the main entry point for the gateway service.
//!
//! # Configuration
//!
//! Read from environment variables; see [`GatewayConfig::from_env`]. `JWT_SECRET`
//! is required outside dev mode.
//!
//! # Dev Mode
//!
//! Build with `--features dev-mode` to use a mock token verifier.
//! Use tokens in format: `test-token:<role>:<id>`, e.g. `test-token:staff:7`.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "dev-mode")]
use concierge_auth::MockTokenVerifier;
#[cfg(not(feature = "dev-mode"))]
use concierge_auth::{AuthConfig, HmacVerifier, MemoryRevocationList};
use concierge_control::ConsultationService;
use concierge_gateway::{create_router, GatewayConfig, GatewayState};
use concierge_store::RocksStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,concierge=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Concierge Gateway");

    let config = GatewayConfig::from_env()?;

    tracing::info!(
        listen_addr = %config.listen_addr,
        data_dir = %config.data_dir,
        strategy = %config.strategy,
        max_concurrent = config.max_concurrent_consultations,
        auth_timeout_seconds = config.auth_timeout_seconds,
        heartbeat_interval_seconds = config.heartbeat_interval_seconds,
        "Gateway configuration loaded"
    );

    // Initialize RocksDB store
    tracing::info!(path = %config.data_dir, "Opening RocksDB store");
    let store = Arc::new(RocksStore::open(&config.data_dir)?);

    let control = Arc::new(ConsultationService::in_memory(
        store,
        config.control_config(),
    ));
    tracing::info!("Consultation service initialized");

    // Initialize token verifier
    #[cfg(feature = "dev-mode")]
    let verifier = {
        tracing::warn!("DEV MODE ENABLED - using mock token verifier");
        tracing::warn!("Use tokens in format: test-token:<role>:<id>");
        Arc::new(MockTokenVerifier::default())
    };

    #[cfg(not(feature = "dev-mode"))]
    let verifier = {
        if config.jwt_secret.is_empty() {
            return Err("JWT_SECRET must be set".into());
        }
        let auth_config = AuthConfig {
            secret: config.jwt_secret.clone(),
            issuer: config.jwt_issuer.clone(),
            ..AuthConfig::default()
        };
        Arc::new(HmacVerifier::new(
            auth_config,
            Arc::new(MemoryRevocationList::new()),
        ))
    };
    tracing::info!("Token verifier initialized");

    let listen_addr = config.listen_addr.clone();
    let state = GatewayState::new(control, verifier, config);
    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    // Start HTTP server
    tracing::info!(listen_addr = %listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
