use std::time::Duration;

use assert_matches::assert_matches;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::services::{EventKind, EventPublisher, PublishError, QueueEvent};
use patient_queue_cell::*;

use super::TestClinic;

async fn called_event() -> QueueEvent {
    let clinic = TestClinic::new();
    let appointment = clinic.arrived(10, 0).await;
    QueueEvent::new(EventKind::PatientCalled, &appointment, super::opening())
}

#[tokio::test]
async fn posts_event_with_its_channels() {
    let server = MockServer::start().await;
    let event = called_event().await;

    Mock::given(method("POST"))
        .and(path("/realtime"))
        .and(body_partial_json(serde_json::json!({
            "channels": ["admin", "provider", format!("patient:{}", event.patient_id)],
            "event": { "kind": "patient-called" }
        })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let publisher =
        WebhookPublisher::new(format!("{}/realtime", server.uri()), Duration::from_secs(2)).unwrap();
    publisher.publish(&event).await.unwrap();
    assert_eq!(publisher.name(), "webhook");
}

#[tokio::test]
async fn non_success_status_is_a_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let publisher = WebhookPublisher::new(server.uri(), Duration::from_secs(2)).unwrap();
    let result = publisher.publish(&called_event().await).await;
    assert_matches!(result, Err(PublishError::Transport(_)));
}

#[tokio::test]
async fn slow_relay_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let publisher = WebhookPublisher::new(server.uri(), Duration::from_millis(50)).unwrap();
    let result = publisher.publish(&called_event().await).await;
    assert_matches!(result, Err(PublishError::Transport(_)));
}
