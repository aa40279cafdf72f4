use chrono::Duration;

use appointment_cell::models::{PriorityTier, VisitType};
use patient_queue_cell::*;

use super::TestClinic;

#[tokio::test]
async fn waiting_list_carries_scores_and_estimates() {
    let clinic = TestClinic::new();
    let early = clinic.arrived(8, 0).await;
    let later = clinic.arrived(9, 0).await;

    let snapshot = QueueService::new(clinic.state.clone()).today(None).await.unwrap();
    let waiting = &snapshot.waiting;

    assert_eq!(waiting.len(), 2);
    assert_eq!(waiting[0].appointment.id, early.id);
    assert_eq!(waiting[0].score, PROXIMITY_WINDOW_MINUTES);
    assert_eq!(waiting[0].rank, 0);
    assert_eq!(waiting[0].estimated_start, super::opening());

    assert_eq!(waiting[1].appointment.id, later.id);
    assert_eq!(waiting[1].score, PROXIMITY_WINDOW_MINUTES - 60);
    assert_eq!(waiting[1].estimated_start, super::opening() + Duration::minutes(15));
}

#[tokio::test]
async fn waiting_time_accumulates_until_capped() {
    let clinic = TestClinic::new();
    let arrived = clinic.arrived(8, 0).await;

    clinic
        .state
        .lifecycle()
        .set_priority(arrived.id, None, Some(VisitType::WalkIn))
        .await
        .unwrap();

    clinic.clock.advance(Duration::minutes(45));
    let snapshot = QueueService::new(clinic.state.clone()).today(None).await.unwrap();
    assert_eq!(snapshot.waiting[0].score, 45);

    clinic.clock.advance(Duration::hours(6));
    let snapshot = QueueService::new(clinic.state.clone()).today(None).await.unwrap();
    assert_eq!(snapshot.waiting[0].score, WAIT_BONUS_CAP_MINUTES);
}

#[tokio::test]
async fn emergency_overtakes_long_waiting_walk_in() {
    let clinic = TestClinic::new();
    let walk_in = clinic.arrived(8, 0).await;
    clinic
        .state
        .lifecycle()
        .set_priority(walk_in.id, None, Some(VisitType::WalkIn))
        .await
        .unwrap();

    clinic.clock.advance(Duration::minutes(45));
    let emergency = clinic.arrived(13, 0).await;
    clinic
        .state
        .lifecycle()
        .set_priority(emergency.id, Some(PriorityTier::Emergency), Some(VisitType::WalkIn))
        .await
        .unwrap();

    let snapshot = QueueService::new(clinic.state.clone()).today(None).await.unwrap();
    assert_eq!(snapshot.waiting[0].appointment.id, emergency.id);
    assert_eq!(snapshot.waiting[0].score, EMERGENCY_WEIGHT);
    assert_eq!(snapshot.waiting[1].appointment.id, walk_in.id);
}
