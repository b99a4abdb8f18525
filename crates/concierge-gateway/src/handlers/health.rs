//! Readiness endpoint.
//!
//! Reports whether the consultation store and the presence registry answer, so a
//! load balancer can take an instance out of rotation when either one is down.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use concierge_auth::TokenVerifier;
use concierge_control::{ConsultationControl, OnlineStatus};

use crate::state::GatewayState;

/// State of one dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    /// Answered.
    Ok,
    /// Returned an error.
    Unavailable,
}

/// Per-dependency results.
#[derive(Debug, Serialize)]
pub struct Checks {
    /// Consultation and staff records.
    pub store: CheckStatus,
    /// Presence registry.
    pub presence: CheckStatus,
}

/// Readiness response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `healthy` when every check passed, `degraded` otherwise.
    pub status: &'static str,
    /// Service version.
    pub version: &'static str,
    /// Per-dependency results.
    pub checks: Checks,
    /// Connected users and staff, when presence answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub online: Option<OnlineStatus>,
    /// Staff who can take a consultation, when the store answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_staff: Option<usize>,
}

/// Readiness handler. Public.
///
/// ```text
/// GET /health
///
/// 200 OK
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "checks": { "store": "ok", "presence": "ok" },
///   "online": { "users": 3, "staff": 1 },
///   "availableStaff": 1
/// }
/// ```
///
/// Any failed check turns the status into `degraded` with `503`.
pub async fn health<C, V>(State(state): State<Arc<GatewayState<C, V>>>) -> impl IntoResponse
where
    C: ConsultationControl + 'static,
    V: TokenVerifier + 'static,
{
    let online = match state.control.online_status().await {
        Ok(online) => Some(online),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness: presence check failed");
            None
        }
    };
    let available_staff = match state.control.available_staff(None).await {
        Ok(staff) => Some(staff.len()),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness: store check failed");
            None
        }
    };

    let checks = Checks {
        store: check(available_staff.is_some()),
        presence: check(online.is_some()),
    };
    let healthy = checks.store == CheckStatus::Ok && checks.presence == CheckStatus::Ok;
    let response = HealthResponse {
        status: if healthy { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        checks,
        online,
        available_staff,
    };

    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(response))
}

const fn check(passed: bool) -> CheckStatus {
    if passed {
        CheckStatus::Ok
    } else {
        CheckStatus::Unavailable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use chrono::Utc;
    use concierge_auth::MockTokenVerifier;
    use concierge_control::{ConsultationService, StaffId};
    use concierge_core::StaffStatus;
    use concierge_store::{MemoryStore, Staff};

    use crate::config::GatewayConfig;

    async fn readiness_with(store: Arc<MemoryStore>) -> (StatusCode, serde_json::Value) {
        let control = Arc::new(ConsultationService::with_defaults(store));
        let state = GatewayState::new(
            control,
            Arc::new(MockTokenVerifier::default()),
            GatewayConfig::default(),
        );
        let response = health(State(Arc::new(state))).await.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn healthy_when_store_and_presence_answer() {
        let store = Arc::new(MemoryStore::with_staff([Staff {
            id: StaffId::new(1),
            name: "alice".to_string(),
            status: StaffStatus::Online,
            updated_at: Utc::now(),
        }]));
        let (status, body) = readiness_with(store).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["checks"]["store"], "ok");
        assert_eq!(body["checks"]["presence"], "ok");
        assert_eq!(body["online"]["users"], 0);
        assert_eq!(body["availableStaff"], 1);
    }

    #[tokio::test]
    async fn store_outage_degrades_readiness() {
        let store = Arc::new(MemoryStore::new());
        store.fail_everything(true);
        let (status, body) = readiness_with(store).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["checks"]["store"], "unavailable");
        assert_eq!(body["checks"]["presence"], "ok");
        assert!(body.get("availableStaff").is_none());
    }
}
