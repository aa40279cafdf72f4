use assert_matches::assert_matches;
use chrono::Duration;
use uuid::Uuid;

use appointment_cell::models::{AppointmentError, PriorityTier, QueueStatus, VisitType};
use patient_queue_cell::*;

use super::TestClinic;

#[tokio::test]
async fn late_booking_is_converted_when_queue_is_read() {
    let clinic = TestClinic::new();
    let late = clinic.confirmed_booking(10, 0).await;
    let on_time = clinic.confirmed_booking(11, 0).await;

    clinic.clock.advance(Duration::minutes(135));
    let snapshot = QueueService::new(clinic.state.clone())
        .today(None)
        .await
        .unwrap();

    assert_eq!(snapshot.converted, vec![late.id]);

    let stored = clinic.state.lifecycle().get(late.id).await.unwrap();
    assert_eq!(stored.visit_type, VisitType::WalkIn);
    assert!(stored.version > late.version);

    let untouched = clinic.state.lifecycle().get(on_time.id).await.unwrap();
    assert_eq!(untouched.visit_type, VisitType::Booking);

    let again = QueueService::new(clinic.state.clone()).today(None).await.unwrap();
    assert!(again.converted.is_empty());
}

#[tokio::test]
async fn booking_inside_grace_period_is_kept() {
    let clinic = TestClinic::new();
    let booking = clinic.confirmed_booking(10, 0).await;

    clinic.clock.advance(Duration::minutes(130));
    let snapshot = QueueService::new(clinic.state.clone()).today(None).await.unwrap();

    assert!(snapshot.converted.is_empty());
    let stored = clinic.state.lifecycle().get(booking.id).await.unwrap();
    assert_eq!(stored.visit_type, VisitType::Booking);
}

#[tokio::test]
async fn call_next_follows_ranking_then_reports_empty() {
    let clinic = TestClinic::new();
    let first = clinic.arrived(10, 0).await;
    let second = clinic.arrived(10, 15).await;
    let third = clinic.arrived(10, 30).await;

    clinic
        .state
        .lifecycle()
        .set_priority(third.id, Some(PriorityTier::Emergency), None)
        .await
        .unwrap();

    let queue = QueueService::new(clinic.state.clone());
    let mut called = Vec::new();
    for _ in 0..3 {
        match queue.call_next(Some(clinic.provider_id)).await.unwrap() {
            CallNextOutcome::Called(appointment) => {
                assert_eq!(appointment.queue_status, Some(QueueStatus::Called));
                assert!(appointment.called_at.is_some());
                called.push(appointment.id);
            }
            CallNextOutcome::Empty => panic!("queue emptied early"),
        }
    }

    assert_eq!(called, vec![third.id, first.id, second.id]);
    assert_eq!(queue.call_next(Some(clinic.provider_id)).await.unwrap(), CallNextOutcome::Empty);
}

#[tokio::test]
async fn call_next_is_scoped_to_provider() {
    let clinic = TestClinic::new();
    clinic.arrived(10, 0).await;

    let outcome = QueueService::new(clinic.state.clone())
        .call_next(Some(Uuid::new_v4()))
        .await
        .unwrap();
    assert_eq!(outcome, CallNextOutcome::Empty);
}

#[tokio::test]
async fn snapshot_groups_by_queue_status() {
    let clinic = TestClinic::new();
    let a = clinic.arrived(10, 0).await;
    let b = clinic.arrived(10, 15).await;
    let c = clinic.arrived(10, 30).await;

    let queue = QueueService::new(clinic.state.clone());
    queue.set_status(a.id, QueueStatus::Called).await.unwrap();
    queue.set_status(b.id, QueueStatus::Called).await.unwrap();
    queue.set_status(b.id, QueueStatus::Skipped).await.unwrap();

    let snapshot = queue.today(Some(clinic.provider_id)).await.unwrap();
    assert_eq!(snapshot.in_service.len(), 1);
    assert_eq!(snapshot.in_service[0].id, a.id);
    assert_eq!(snapshot.skipped[0].id, b.id);
    assert_eq!(snapshot.waiting.len(), 1);
    assert_eq!(snapshot.waiting[0].appointment.id, c.id);
    assert!(snapshot.served.is_empty());

    queue.set_status(a.id, QueueStatus::InProgress).await.unwrap();
    queue.set_status(a.id, QueueStatus::Served).await.unwrap();
    let snapshot = queue.today(Some(clinic.provider_id)).await.unwrap();
    assert_eq!(snapshot.served[0].id, a.id);
    assert!(snapshot.in_service.is_empty());
}

#[tokio::test]
async fn position_reports_rank_within_provider_queue() {
    let clinic = TestClinic::new();
    let first = clinic.arrived(10, 0).await;
    let second = clinic.arrived(10, 15).await;

    let queue = QueueService::new(clinic.state.clone());

    let position = queue.position(second.patient_id).await.unwrap();
    assert_eq!(position.appointment_id, second.id);
    assert_eq!(position.queue_number, Some(2));
    assert_eq!(position.rank, Some(1));
    assert_eq!(position.ahead, 1);
    assert_eq!(
        position.estimated_start,
        Some(super::opening() + Duration::minutes(15))
    );

    queue.set_status(first.id, QueueStatus::Called).await.unwrap();
    let position = queue.position(first.patient_id).await.unwrap();
    assert_eq!(position.queue_status, Some(QueueStatus::Called));
    assert_eq!(position.rank, None);
    assert_eq!(position.ahead, 0);
}

#[tokio::test]
async fn position_requires_a_queue_entry() {
    let clinic = TestClinic::new();
    let booked = clinic.confirmed_booking(10, 0).await;

    let queue = QueueService::new(clinic.state.clone());
    assert_matches!(queue.position(booked.patient_id).await, Err(QueueError::NotInQueue));
    assert_matches!(queue.position(Uuid::new_v4()).await, Err(QueueError::NotInQueue));
}

#[tokio::test]
async fn priority_update_needs_a_field() {
    let clinic = TestClinic::new();
    let arrived = clinic.arrived(10, 0).await;

    let queue = QueueService::new(clinic.state.clone());
    assert_matches!(
        queue.set_priority(arrived.id, UpdatePriorityRequest::default()).await,
        Err(QueueError::ValidationError(_))
    );

    let updated = queue
        .set_priority(
            arrived.id,
            UpdatePriorityRequest {
                priority_tier: Some(PriorityTier::Priority),
                visit_type: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.priority_tier, PriorityTier::Priority);
}

#[tokio::test]
async fn invalid_transition_surfaces_from_lifecycle() {
    let clinic = TestClinic::new();
    let arrived = clinic.arrived(10, 0).await;

    let result = QueueService::new(clinic.state.clone())
        .set_status(arrived.id, QueueStatus::Served)
        .await;
    assert_matches!(
        result,
        Err(QueueError::Appointment(AppointmentError::InvalidTransition { .. }))
    );
}
