//! HTTP and WebSocket gateway for concierge.
//!
//! This crate is the public face of consultation routing. It handles:
//!
//! - Bearer-token authentication (signature, expiry and revocation)
//! - The realtime WebSocket channel: per-connection auth, role-scoped operations,
//!   heartbeat and guaranteed presence cleanup
//! - REST endpoints over the same consultation service
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Users / Staff / Admins                     │
//! │                   (HTTP / WebSocket)                        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    concierge-gateway                        │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐    │
//! │  │   Auth      │ │   Router    │ │    WebSocket        │    │
//! │  │  Extractor  │ │  + Handlers │ │    sessions         │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┴──────────────┐
//!               ▼                             ▼
//!        ┌──────────────┐              ┌──────────┐
//!        │ Consultation │              │  Auth    │
//!        │ service      │              │ (JWT)    │
//!        └──────────────┘              └──────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use concierge_auth::{AuthConfig, HmacVerifier, MemoryRevocationList};
//! use concierge_control::ConsultationService;
//! use concierge_gateway::{create_router, GatewayConfig, GatewayState};
//! use concierge_store::RocksStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Initialize dependencies
//! let store = Arc::new(RocksStore::open("/tmp/concierge")?);
//! let control = Arc::new(ConsultationService::with_defaults(store));
//! let verifier = Arc::new(HmacVerifier::new(
//!     AuthConfig::with_secret("change-me"),
//!     Arc::new(MemoryRevocationList::new()),
//! ));
//!
//! // Create gateway state
//! let state = GatewayState::new(control, verifier, GatewayConfig::default());
//!
//! // Create router
//! let app = create_router(state);
//!
//! // Run server
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::GatewayConfig;
pub use error::ApiError;
pub use routes::create_router;
pub use state::GatewayState;

// Re-export key types for convenience
pub use auth::AuthUser;
pub use handlers::ws::ClientOp;
