use std::sync::Arc;
use std::time::Duration;

use shared_config::AppConfig;

use crate::services::clock::{ClinicCalendar, Clock, SystemClock};
use crate::services::events::{EventPublisher, Fanout};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::reservation::SlotReservationService;
use crate::services::sequencer::QueueSequencer;
use crate::services::store::{InMemorySchedulingStore, SchedulingStore};

/// Shared handles for the scheduling core. Services are cheap to build and are
/// constructed per request from these.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn SchedulingStore>,
    pub clock: Arc<dyn Clock>,
    pub fanout: Fanout,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        store: Arc<dyn SchedulingStore>,
        clock: Arc<dyn Clock>,
        publisher: Option<Arc<dyn EventPublisher>>,
    ) -> Self {
        let fanout = Fanout::new(publisher, Duration::from_millis(config.publish_timeout_ms));
        Self {
            config,
            store,
            clock,
            fanout,
        }
    }

    /// Process-local state on the system clock, with no event transport.
    pub fn in_memory(config: Arc<AppConfig>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = Arc::new(InMemorySchedulingStore::new(clock.clone()));
        Self::new(config, store, clock, None)
    }

    pub fn calendar(&self) -> ClinicCalendar {
        ClinicCalendar::new(self.config.clinic_utc_offset_minutes)
    }

    pub fn reservations(&self) -> SlotReservationService {
        SlotReservationService::new(
            self.store.clone(),
            self.clock.clone(),
            self.calendar(),
            self.config.clone(),
        )
    }

    pub fn lifecycle(&self) -> AppointmentLifecycleService {
        AppointmentLifecycleService::new(
            self.store.clone(),
            self.clock.clone(),
            self.calendar(),
            self.fanout.clone(),
        )
    }

    pub fn sequencer(&self) -> QueueSequencer {
        QueueSequencer::new(self.store.clone())
    }
}
