use std::sync::Arc;
use std::time::Duration as StdDuration;

use serde_json::Value;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::timeout;
use uuid::Uuid;

use appointment_cell::services::{Audience, EventKind, EventPublisher, QueueEvent};
use patient_queue_cell::*;

use super::TestClinic;

#[tokio::test]
async fn new_hub_has_no_patient_channels() {
    let hub = RealtimeHub::default();
    assert!(hub.active_patient_channels().await.is_empty());
}

#[tokio::test]
async fn patient_channel_lives_while_subscribed() {
    let hub = RealtimeHub::new();
    let patient_id = Uuid::new_v4();

    let receiver = hub.subscribe(&Audience::Patient(patient_id)).await;
    assert_eq!(hub.active_patient_channels().await, vec![patient_id]);

    drop(receiver);
    assert!(hub.active_patient_channels().await.is_empty());
}

#[tokio::test]
async fn patient_events_reach_only_that_patient() {
    let clinic = TestClinic::new();
    let hub = RealtimeHub::new();
    let appointment = clinic.arrived(10, 0).await;

    let mut mine = hub.subscribe(&Audience::Patient(appointment.patient_id)).await;
    let mut other = hub.subscribe(&Audience::Patient(Uuid::new_v4())).await;
    let mut admin = hub.subscribe(&Audience::Admin).await;
    let mut provider = hub.subscribe(&Audience::Provider).await;

    let event = QueueEvent::new(EventKind::PatientCalled, &appointment, super::opening());
    let delivered = hub.broadcast(&event).await.unwrap();
    assert_eq!(delivered, 3);

    let message: Value = serde_json::from_str(&mine.recv().await.unwrap()).unwrap();
    assert_eq!(message["channel"], format!("patient:{}", appointment.patient_id));
    assert_eq!(message["event"]["kind"], "patient-called");
    assert_eq!(message["event"]["appointment_id"], appointment.id.to_string());

    let message: Value = serde_json::from_str(&admin.recv().await.unwrap()).unwrap();
    assert_eq!(message["channel"], "admin");
    let message: Value = serde_json::from_str(&provider.recv().await.unwrap()).unwrap();
    assert_eq!(message["channel"], "provider");

    assert_eq!(other.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test]
async fn queue_updates_stay_on_staff_channels() {
    let clinic = TestClinic::new();
    let hub = RealtimeHub::new();
    let appointment = clinic.arrived(10, 0).await;

    let mut patient = hub.subscribe(&Audience::Patient(appointment.patient_id)).await;
    let mut provider = hub.subscribe(&Audience::Provider).await;

    let event = QueueEvent::new(EventKind::QueueUpdated, &appointment, super::opening());
    assert_eq!(hub.broadcast(&event).await.unwrap(), 1);

    assert!(provider.recv().await.is_ok());
    assert_eq!(patient.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test]
async fn broadcast_without_listeners_is_not_an_error() {
    let clinic = TestClinic::new();
    let hub = RealtimeHub::new();
    let appointment = clinic.confirmed_booking(10, 0).await;

    let event = QueueEvent::new(EventKind::AppointmentConfirmed, &appointment, super::opening());
    assert_eq!(hub.broadcast(&event).await.unwrap(), 0);
    assert!(hub.publish(&event).await.is_ok());
    assert_eq!(hub.name(), "websocket");
}

#[tokio::test]
async fn lifecycle_changes_are_fanned_out_to_the_hub() {
    let hub = Arc::new(RealtimeHub::new());
    let clinic = TestClinic::with_publisher(Some(hub.clone()));
    let confirmed = clinic.confirmed_booking(10, 0).await;

    let mut patient = hub.subscribe(&Audience::Patient(confirmed.patient_id)).await;
    clinic
        .state
        .lifecycle()
        .confirm_arrival(confirmed.id, &Default::default())
        .await
        .unwrap();

    // The earlier confirmation may still be in flight; skip ahead to the arrival.
    let message = loop {
        let raw = timeout(StdDuration::from_secs(1), patient.recv())
            .await
            .expect("event delivered")
            .unwrap();
        let message: Value = serde_json::from_str(&raw).unwrap();
        if message["event"]["kind"] == "queue-number-assigned" {
            break message;
        }
    };
    assert_eq!(message["event"]["snapshot"]["queue_number"], 1);
}
