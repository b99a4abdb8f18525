//! Gateway application state.
//!
//! This module defines the shared state that is available to all request handlers.

use std::sync::Arc;

use concierge_auth::TokenVerifier;
use concierge_control::ConsultationControl;

use crate::config::GatewayConfig;

/// Shared application state for the gateway.
///
/// This struct holds references to all services needed by the HTTP and WebSocket
/// handlers.
pub struct GatewayState<C, V>
where
    C: ConsultationControl,
    V: TokenVerifier,
{
    /// The consultation service.
    pub control: Arc<C>,
    /// Verifies bearer credentials and checks revocation.
    pub verifier: Arc<V>,
    /// Gateway configuration.
    pub config: GatewayConfig,
}

impl<C, V> GatewayState<C, V>
where
    C: ConsultationControl,
    V: TokenVerifier,
{
    /// Create a new gateway state.
    #[must_use]
    pub fn new(control: Arc<C>, verifier: Arc<V>, config: GatewayConfig) -> Self {
        Self {
            control,
            verifier,
            config,
        }
    }
}

impl<C, V> Clone for GatewayState<C, V>
where
    C: ConsultationControl,
    V: TokenVerifier,
{
    fn clone(&self) -> Self {
        Self {
            control: Arc::clone(&self.control),
            verifier: Arc::clone(&self.verifier),
            config: self.config.clone(),
        }
    }
}
