use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use patient_queue_cell::{create_queue_router, QueueState, RealtimeHub};
use shared_utils::test_utils::TestUser;

use super::TestClinic;

fn router(clinic: &TestClinic) -> Router {
    create_queue_router(QueueState::new(clinic.state.clone(), Arc::new(RealtimeHub::new())))
}

fn request(method: Method, uri: &str, user: Option<&TestUser>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header(header::AUTHORIZATION, user.bearer());
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn queue_routes_require_a_token() {
    let clinic = TestClinic::new();
    let (status, body) = send(&router(&clinic), request(Method::GET, "/today", None, None)).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthenticated");
}

#[tokio::test]
async fn patients_cannot_read_or_drive_the_queue() {
    let clinic = TestClinic::new();
    let app = router(&clinic);
    let patient = TestUser::patient();

    let (status, _) = send(&app, request(Method::GET, "/today", Some(&patient), None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, request(Method::POST, "/next", Some(&patient), Some(json!({})))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn nurse_sees_ranked_queue_and_calls_next() {
    let clinic = TestClinic::new();
    let app = router(&clinic);
    let nurse = TestUser::nurse();
    let first = clinic.arrived(9, 0).await;
    let second = clinic.arrived(9, 30).await;

    let uri = format!("/today?provider_id={}", clinic.provider_id);
    let (status, body) = send(&app, request(Method::GET, &uri, Some(&nurse), None)).await;
    assert_eq!(status, StatusCode::OK);
    let waiting = body["queue"]["waiting"].as_array().unwrap();
    assert_eq!(waiting.len(), 2);
    assert_eq!(waiting[0]["appointment"]["id"], first.id.to_string());
    assert_eq!(waiting[1]["appointment"]["id"], second.id.to_string());

    let call = json!({ "provider_id": clinic.provider_id });
    let (status, body) = send(&app, request(Method::POST, "/next", Some(&nurse), Some(call.clone()))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["empty"], false);
    assert_eq!(body["appointment"]["id"], first.id.to_string());
    assert_eq!(body["appointment"]["queue_status"], "called");

    send(&app, request(Method::POST, "/next", Some(&nurse), Some(call.clone()))).await;
    let (status, body) = send(&app, request(Method::POST, "/next", Some(&nurse), Some(call))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["empty"], true);
}

#[tokio::test]
async fn status_and_priority_updates_validate_input() {
    let clinic = TestClinic::new();
    let app = router(&clinic);
    let doctor = TestUser::doctor();
    let arrived = clinic.arrived(9, 0).await;

    let uri = format!("/{}/status", arrived.id);
    let (status, body) = send(
        &app,
        request(Method::PUT, &uri, Some(&doctor), Some(json!({ "status": "served" }))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "InvalidTransition");

    let (status, body) = send(
        &app,
        request(Method::PUT, &uri, Some(&doctor), Some(json!({ "status": "called" }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["appointment"]["queue_status"], "called");

    let uri = format!("/{}/priority", arrived.id);
    let (status, body) = send(&app, request(Method::PUT, &uri, Some(&doctor), Some(json!({})))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "ValidationError");

    let (status, body) = send(
        &app,
        request(Method::PUT, &uri, Some(&doctor), Some(json!({ "priority_tier": "emergency" }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["appointment"]["priority_tier"], "emergency");

    let missing = format!("/{}/priority", Uuid::new_v4());
    let (status, _) = send(
        &app,
        request(Method::PUT, &missing, Some(&doctor), Some(json!({ "priority_tier": "priority" }))),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn patient_reads_own_position() {
    let clinic = TestClinic::new();
    let app = router(&clinic);
    let patient = TestUser::patient();

    let (status, body) = send(&app, request(Method::GET, "/position", Some(&patient), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NotFound");

    clinic.arrived(9, 0).await;
    let booked = clinic
        .state
        .reservations()
        .book(patient.id, clinic.slot(9, 30), String::new())
        .await
        .unwrap();
    clinic.state.lifecycle().confirm(booked.id).await.unwrap();
    clinic
        .state
        .lifecycle()
        .confirm_arrival(booked.id, &Default::default())
        .await
        .unwrap();

    let (status, body) = send(&app, request(Method::GET, "/position", Some(&patient), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["position"]["appointment_id"], booked.id.to_string());
    assert_eq!(body["position"]["queue_number"], 2);
    assert_eq!(body["position"]["ahead"], 1);

    let (status, _) = send(&app, request(Method::GET, "/position", Some(&TestUser::nurse()), None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
