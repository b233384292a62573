//! Event bus for device notifications
//!
//! A `tokio::sync::broadcast` channel. The command router publishes, outer
//! adapters (MQTT) subscribe. Publishing never blocks and never fails the
//! command that triggered it.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum BusEvent {
    /// A power or setting command was applied. `payload` is `ON`, `OFF`
    /// or `KEY:value`.
    DeviceCommand {
        room: String,
        device: String,
        payload: String,
    },
    DeviceAdded { room: String, device: String },
    DeviceRemoved { room: String, device: String },
}

impl BusEvent {
    pub fn command(room: &str, device: &str, payload: String) -> Self {
        BusEvent::DeviceCommand {
            room: room.to_string(),
            device: device.to_string(),
            payload,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BusEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: BusEvent) {
        if let Err(broadcast::error::SendError(event)) = self.sender.send(event) {
            tracing::trace!("No bus subscribers for {:?}", event);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

pub type SharedBus = Arc<EventBus>;

pub fn create_bus() -> SharedBus {
    Arc::new(EventBus::default())
}
