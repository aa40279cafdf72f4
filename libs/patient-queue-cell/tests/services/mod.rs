use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use uuid::Uuid;

use appointment_cell::models::{Appointment, ConfirmArrivalRequest, SlotKey};
use appointment_cell::services::{EventPublisher, InMemorySchedulingStore, ManualClock};
use appointment_cell::AppState;
use shared_utils::test_utils::TestConfig;

mod queue_test;
mod router_test;
mod scheduler_test;
mod webhook_test;
mod websocket_test;

/// In-memory clinic pinned to 08:00 UTC on 2025-01-10.
pub struct TestClinic {
    pub state: Arc<AppState>,
    pub clock: Arc<ManualClock>,
    pub provider_id: Uuid,
}

impl TestClinic {
    pub fn new() -> Self {
        Self::with_publisher(None)
    }

    pub fn with_publisher(publisher: Option<Arc<dyn EventPublisher>>) -> Self {
        let clock = Arc::new(ManualClock::new(opening()));
        let store = Arc::new(InMemorySchedulingStore::new(clock.clone()));
        let state = AppState::new(TestConfig::default().to_arc(), store, clock.clone(), publisher);

        Self {
            state: Arc::new(state),
            clock,
            provider_id: Uuid::new_v4(),
        }
    }

    pub fn slot(&self, h: u32, m: u32) -> SlotKey {
        SlotKey::new(self.provider_id, today(), NaiveTime::from_hms_opt(h, m, 0).unwrap())
    }

    /// Book and provider-confirm a slot for a fresh patient.
    pub async fn confirmed_booking(&self, h: u32, m: u32) -> Appointment {
        let booked = self
            .state
            .reservations()
            .book(Uuid::new_v4(), self.slot(h, m), "check-up".to_string())
            .await
            .unwrap();
        self.state.lifecycle().confirm(booked.id).await.unwrap()
    }

    /// Confirmed booking whose patient has checked in.
    pub async fn arrived(&self, h: u32, m: u32) -> Appointment {
        let confirmed = self.confirmed_booking(h, m).await;
        self.state
            .lifecycle()
            .confirm_arrival(confirmed.id, &ConfirmArrivalRequest::default())
            .await
            .unwrap()
    }
}

pub fn opening() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 10, 8, 0, 0).unwrap()
}

pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 10).unwrap()
}
