use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, error, info, warn};

use crate::models::{Appointment, AppointmentError};
use crate::services::store::{SchedulingStore, StoreError};

/// Issues per-day queue numbers from the store's atomic counter.
///
/// Transient storage failures are retried with a linear backoff. A request that
/// still cannot reach the counter fails as `Unavailable` rather than proceeding
/// without a number.
pub struct QueueSequencer {
    store: Arc<dyn SchedulingStore>,
    max_retry_attempts: u32,
    backoff_ms: u64,
}

impl QueueSequencer {
    pub fn new(store: Arc<dyn SchedulingStore>) -> Self {
        Self {
            store,
            max_retry_attempts: 3,
            backoff_ms: 100,
        }
    }

    pub async fn next_queue_number(&self, date: NaiveDate) -> Result<u32, AppointmentError> {
        let mut attempt = 1;
        loop {
            match self.store.next_queue_number(date).await {
                Ok(number) => {
                    debug!("Issued queue number {} for {}", number, date);
                    return Ok(number);
                }
                Err(StoreError::Unavailable(reason)) if attempt < self.max_retry_attempts => {
                    warn!(
                        "Queue counter for {} unavailable, retrying attempt {}/{}: {}",
                        date, attempt, self.max_retry_attempts, reason
                    );
                    self.pause(attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!("Failed to issue queue number for {}: {}", date, e);
                    return Err(AppointmentError::from(e));
                }
            }
        }
    }

    /// Persist an arrival and stamp its queue number in one store operation.
    ///
    /// Version conflicts are returned untouched so the caller can re-read. After
    /// a transport failure the stored record is checked first: a commit whose
    /// reply was lost is reported as the success it was.
    pub async fn stamp_arrival(
        &self,
        previous: &Appointment,
        next: Appointment,
    ) -> Result<Appointment, StoreError> {
        let mut attempt = 1;
        loop {
            match self.store.commit_arrival(previous, next.clone()).await {
                Err(StoreError::Unavailable(reason)) => {
                    if let Some(committed) = self.committed_arrival(previous).await {
                        info!(
                            "Arrival commit for {} landed before the connection failed, queue number {:?}",
                            previous.id, committed.queue_number
                        );
                        return Ok(committed);
                    }
                    if attempt >= self.max_retry_attempts {
                        error!("Arrival commit for {} failed after retries: {}", previous.id, reason);
                        return Err(StoreError::Unavailable(reason));
                    }
                    warn!(
                        "Arrival commit for {} failed, retrying attempt {}/{}: {}",
                        previous.id, attempt, self.max_retry_attempts, reason
                    );
                    self.pause(attempt).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// The stored record if it is exactly the arrival written on top of `previous`.
    async fn committed_arrival(&self, previous: &Appointment) -> Option<Appointment> {
        let stored = self.store.get_appointment(previous.id).await.ok()?;
        let landed = stored.version == previous.version + 1
            && !previous.arrived
            && stored.arrived
            && stored.queue_number.is_some();
        landed.then_some(stored)
    }

    async fn pause(&self, attempt: u32) {
        tokio::time::sleep(tokio::time::Duration::from_millis(self.backoff_ms * attempt as u64)).await;
    }
}
