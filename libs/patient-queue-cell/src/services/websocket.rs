use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

use appointment_cell::services::{Audience, EventPublisher, PublishError, QueueEvent};

pub type WebSocketSender = broadcast::Sender<String>;
pub type WebSocketReceiver = broadcast::Receiver<String>;

const ROLE_CHANNEL_CAPACITY: usize = 1000;
const PATIENT_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    channel: String,
    event: &'a QueueEvent,
}

/// In-process transport: one broadcast channel per role audience and one per
/// connected patient. WebSocket sessions subscribe to exactly one of them.
pub struct RealtimeHub {
    admin: WebSocketSender,
    provider: WebSocketSender,
    patients: Arc<RwLock<HashMap<Uuid, WebSocketSender>>>,
}

impl RealtimeHub {
    pub fn new() -> Self {
        let (admin, _) = broadcast::channel(ROLE_CHANNEL_CAPACITY);
        let (provider, _) = broadcast::channel(ROLE_CHANNEL_CAPACITY);

        Self {
            admin,
            provider,
            patients: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn subscribe(&self, audience: &Audience) -> WebSocketReceiver {
        match audience {
            Audience::Admin => self.admin.subscribe(),
            Audience::Provider => self.provider.subscribe(),
            Audience::Patient(patient_id) => {
                let mut patients = self.patients.write().await;
                patients.retain(|_, sender| sender.receiver_count() > 0);
                patients
                    .entry(*patient_id)
                    .or_insert_with(|| {
                        debug!("Created realtime channel for patient {}", patient_id);
                        broadcast::channel(PATIENT_CHANNEL_CAPACITY).0
                    })
                    .subscribe()
            }
        }
    }

    pub async fn active_patient_channels(&self) -> Vec<Uuid> {
        let patients = self.patients.read().await;
        patients
            .iter()
            .filter(|(_, sender)| sender.receiver_count() > 0)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Deliver to every audience of the event. Returns how many live
    /// subscribers received it; no listeners is not an error.
    pub async fn broadcast(&self, event: &QueueEvent) -> Result<usize, PublishError> {
        let mut delivered = 0;

        for audience in event.audiences() {
            let message = serde_json::to_string(&Envelope {
                channel: audience.channel_name(),
                event,
            })?;

            let sent = match &audience {
                Audience::Admin => self.admin.send(message).ok(),
                Audience::Provider => self.provider.send(message).ok(),
                Audience::Patient(patient_id) => {
                    let patients = self.patients.read().await;
                    patients.get(patient_id).and_then(|sender| sender.send(message).ok())
                }
            };

            match sent {
                Some(count) => delivered += count,
                None => debug!("No listeners on {} for {:?}", audience.channel_name(), event.kind),
            }
        }

        Ok(delivered)
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for RealtimeHub {
    async fn publish(&self, event: &QueueEvent) -> Result<(), PublishError> {
        self.broadcast(event).await.map(|_| ())
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}
