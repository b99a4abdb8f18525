//! REST surface tests against an in-memory consultation service.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceExt;

use concierge_auth::MockTokenVerifier;
use concierge_control::{ConsultationService, Identity, StaffId, UserId};
use concierge_core::{AdminId, StaffStatus};
use concierge_gateway::{create_router, GatewayConfig, GatewayState};
use concierge_store::{MemoryStore, Staff};

const USER: Identity = Identity::User(UserId::new(10));
const STAFF: Identity = Identity::Staff(StaffId::new(1));
const ADMIN: Identity = Identity::Admin(AdminId::new(1));

fn app_with(status: StaffStatus) -> (Router, Arc<MockTokenVerifier>) {
    let store = Arc::new(MemoryStore::with_staff([Staff {
        id: StaffId::new(1),
        name: "alice".to_string(),
        status,
        updated_at: Utc::now(),
    }]));
    let control = Arc::new(ConsultationService::with_defaults(store));
    let verifier = Arc::new(MockTokenVerifier::default());
    let state = GatewayState::new(control, Arc::clone(&verifier), GatewayConfig::default());
    (create_router(state), verifier)
}

async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    caller: Option<Identity>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(identity) = caller {
        request = request.header(
            AUTHORIZATION,
            format!("Bearer {}", MockTokenVerifier::token_for(identity)),
        );
    }
    let request = match body {
        Some(body) => request
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn error_code(body: &Value) -> &str {
    body["error"]["code"].as_str().unwrap_or_default()
}

async fn open_consultation(app: &Router) -> Value {
    let (_, body) = call(app, Method::POST, "/v1/consultations", Some(USER), Some(json!({}))).await;
    body["consultation"].clone()
}

#[tokio::test]
async fn health_is_public() {
    let (app, _) = app_with(StaffStatus::Online);
    let (status, body) = call(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn missing_or_revoked_token_is_rejected() {
    let (app, verifier) = app_with(StaffStatus::Online);

    let (status, body) = call(&app, Method::GET, "/v1/staff/online-count", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&body), "AUTH_FAILED");

    verifier.revoke(&MockTokenVerifier::token_for(USER));
    let (status, _) = call(&app, Method::GET, "/v1/staff/online-count", Some(USER), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn second_create_returns_the_open_consultation() {
    let (app, _) = app_with(StaffStatus::Online);

    let (status, first) =
        call(&app, Method::POST, "/v1/consultations", Some(USER), Some(json!({}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["existing"], false);
    assert_eq!(first["consultation"]["status"], "active");
    assert_eq!(first["consultation"]["staffId"], 1);

    let (status, second) =
        call(&app, Method::POST, "/v1/consultations", Some(USER), Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["existing"], true);
    assert_eq!(second["consultation"]["id"], first["consultation"]["id"]);
}

#[tokio::test]
async fn only_users_open_consultations() {
    let (app, _) = app_with(StaffStatus::Online);
    let (status, _) =
        call(&app, Method::POST, "/v1/consultations", Some(STAFF), Some(json!({}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn requested_staff_must_be_reachable() {
    let (app, _) = app_with(StaffStatus::Offline);
    let (status, body) = call(
        &app,
        Method::POST,
        "/v1/consultations",
        Some(USER),
        Some(json!({ "requestedStaffId": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "INVALID_TARGET");
}

#[tokio::test]
async fn accept_is_staff_only_and_happens_once() {
    let (app, _) = app_with(StaffStatus::Offline);
    let consultation = open_consultation(&app).await;
    assert_eq!(consultation["status"], "waiting");
    let path = format!("/v1/consultations/{}/accept", consultation["id"]);

    let (status, _) = call(&app, Method::POST, &path, Some(USER), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, accepted) = call(&app, Method::POST, &path, Some(STAFF), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(accepted["status"], "active");

    let (status, again) = call(&app, Method::POST, &path, Some(STAFF), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_code(&again), "INVALID_STATE");
}

#[tokio::test]
async fn malformed_ids_are_bad_requests() {
    let (app, _) = app_with(StaffStatus::Online);
    let (status, body) =
        call(&app, Method::GET, "/v1/consultations/not-a-number", Some(USER), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "VALIDATION_ERROR");
}

#[tokio::test]
async fn conversation_close_and_rate() {
    let (app, _) = app_with(StaffStatus::Online);
    let consultation = open_consultation(&app).await;
    let id = consultation["id"].as_u64().unwrap();

    // A recalled message no longer counts as unread.
    let (status, first) = call(
        &app,
        Method::POST,
        "/v1/messages",
        Some(USER),
        Some(json!({ "consultationId": id, "content": "wrong chat" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let first_id = first["id"].as_u64().unwrap();

    let (status, recalled) = call(
        &app,
        Method::POST,
        &format!("/v1/messages/{first_id}/recall"),
        Some(USER),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(recalled["status"], "recalled");

    let (status, second) = call(
        &app,
        Method::POST,
        "/v1/messages",
        Some(USER),
        Some(json!({ "consultationId": id, "content": "my order is late" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let second_id = second["id"].as_u64().unwrap();

    let (_, unread) = call(
        &app,
        Method::GET,
        &format!("/v1/consultations/{id}/unread"),
        Some(STAFF),
        None,
    )
    .await;
    assert_eq!(unread["count"], 1);

    let (_, read) = call(
        &app,
        Method::POST,
        &format!("/v1/consultations/{id}/read"),
        Some(STAFF),
        Some(json!({})),
    )
    .await;
    assert_eq!(read["messageIds"], json!([second_id]));

    let (status, history) = call(
        &app,
        Method::GET,
        &format!("/v1/consultations/{id}/messages?page=1&limit=10"),
        Some(STAFF),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<u64> = history["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_u64().unwrap())
        .collect();
    assert!(ids.contains(&first_id));
    assert!(ids.contains(&second_id));

    let (status, closed) = call(
        &app,
        Method::POST,
        &format!("/v1/consultations/{id}/close"),
        Some(STAFF),
        Some(json!({ "reason": "resolved" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(closed["status"], "closed");

    let rate_path = format!("/v1/consultations/{id}/rate");
    let (status, rated) = call(
        &app,
        Method::POST,
        &rate_path,
        Some(USER),
        Some(json!({ "rating": 5, "feedback": "great" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rated["rating"], 5);

    let (status, again) =
        call(&app, Method::POST, &rate_path, Some(USER), Some(json!({ "rating": 1 }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_code(&again), "INVALID_STATE");
}

#[tokio::test]
async fn outsiders_cannot_read_a_consultation() {
    let (app, _) = app_with(StaffStatus::Online);
    let consultation = open_consultation(&app).await;
    let stranger = Identity::User(UserId::new(99));

    let (status, _) = call(
        &app,
        Method::GET,
        &format!("/v1/consultations/{}", consultation["id"]),
        Some(stranger),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn staff_status_and_admin_broadcast() {
    let (app, _) = app_with(StaffStatus::Online);

    let (status, updated) = call(
        &app,
        Method::PUT,
        "/v1/staff/status",
        Some(STAFF),
        Some(json!({ "status": "busy" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["status"], "busy");

    let (status, _) = call(
        &app,
        Method::POST,
        "/v1/admin/broadcast",
        Some(STAFF),
        Some(json!({ "message": "maintenance at noon" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, report) = call(
        &app,
        Method::POST,
        "/v1/admin/broadcast",
        Some(ADMIN),
        Some(json!({ "message": "maintenance at noon", "target": "staff" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["delivered"], 0);

    let (_, online) = call(&app, Method::GET, "/v1/staff/online-count", Some(ADMIN), None).await;
    assert_eq!(online, json!({ "users": 0, "staff": 0 }));
}

#[tokio::test]
async fn logout_revokes_the_presented_token() {
    let (app, _) = app_with(StaffStatus::Online);

    let (status, _) = call(&app, Method::POST, "/v1/auth/logout", Some(USER), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = call(&app, Method::GET, "/v1/staff/online-count", Some(USER), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&body), "AUTH_FAILED");

    // Other identities keep working.
    let (status, _) = call(&app, Method::GET, "/v1/staff/online-count", Some(STAFF), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(&app, Method::POST, "/v1/auth/logout", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn staff_find_waiting_consultations() {
    let (app, _) = app_with(StaffStatus::Offline);
    let consultation = open_consultation(&app).await;
    assert_eq!(consultation["status"], "waiting");

    let (status, queue) = call(
        &app,
        Method::GET,
        "/v1/consultations?status=waiting",
        Some(STAFF),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(queue["total"], 1);
    assert_eq!(queue["consultations"][0]["id"], consultation["id"]);

    // Without the status filter staff only see their own assignments.
    let (_, own) = call(&app, Method::GET, "/v1/consultations", Some(STAFF), None).await;
    assert_eq!(own["total"], 0);

    let path = format!("/v1/consultations/{}/accept", consultation["id"]);
    call(&app, Method::POST, &path, Some(STAFF), None).await;

    let (_, queue) = call(
        &app,
        Method::GET,
        "/v1/consultations?status=waiting",
        Some(STAFF),
        None,
    )
    .await;
    assert_eq!(queue["total"], 0);
    let (_, own) = call(&app, Method::GET, "/v1/consultations", Some(STAFF), None).await;
    assert_eq!(own["total"], 1);
}

#[tokio::test]
async fn users_list_only_their_consultations() {
    let (app, _) = app_with(StaffStatus::Online);
    let consultation = open_consultation(&app).await;
    let stranger = Identity::User(UserId::new(99));

    let (status, mine) =
        call(&app, Method::GET, "/v1/consultations?page=1&limit=10", Some(USER), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine["total"], 1);
    assert_eq!(mine["limit"], 10);
    assert_eq!(mine["consultations"][0]["id"], consultation["id"]);

    let (_, theirs) = call(
        &app,
        Method::GET,
        "/v1/consultations?userId=10",
        Some(stranger),
        None,
    )
    .await;
    assert_eq!(theirs["total"], 0);

    let (_, all) = call(&app, Method::GET, "/v1/consultations", Some(ADMIN), None).await;
    assert_eq!(all["total"], 1);
}

#[tokio::test]
async fn available_staff_excludes_offline_members() {
    let (app, _) = app_with(StaffStatus::Online);
    let (status, staff) = call(&app, Method::GET, "/v1/staff/available", Some(USER), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(staff.as_array().map(Vec::len), Some(1));
    assert_eq!(staff[0]["name"], "alice");

    // A staff member is not their own transfer target.
    let (_, staff) = call(&app, Method::GET, "/v1/staff/available", Some(STAFF), None).await;
    assert_eq!(staff, json!([]));

    let (app, _) = app_with(StaffStatus::Offline);
    let (_, staff) = call(&app, Method::GET, "/v1/staff/available", Some(USER), None).await;
    assert_eq!(staff, json!([]));
}
