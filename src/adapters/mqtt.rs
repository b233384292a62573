//! MQTT Adapter
//!
//! Forwards device notifications from the event bus to the broker:
//! `{prefix}/{room}/{device}/set` carries the command payload (`ON`, `OFF`,
//! `BRIGHTNESS:75`, ...). Televisions added or removed at runtime are
//! announced as retained `online`/`offline` on `{prefix}/{room}/{device}/availability`.
//!
//! The adapter only publishes. Nothing in the hub waits on the broker.

use anyhow::{anyhow, Result};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::bus::{BusEvent, SharedBus};

pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_TOPIC_PREFIX: &str = "home";
const CLIENT_ID: &str = "smart-home-hub";
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttStatus {
    pub connected: bool,
    pub host: Option<String>,
    pub port: u16,
    pub topic_prefix: String,
}

struct MqttState {
    host: Option<String>,
    port: u16,
    username: Option<String>,
    password: Option<String>,
    topic_prefix: String,
    connected: bool,
}

impl Default for MqttState {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            username: None,
            password: None,
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            connected: false,
        }
    }
}

/// One outgoing broker message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

/// Map a bus event to the message it produces.
pub fn outgoing_for(prefix: &str, event: &BusEvent) -> Outgoing {
    let (room, device, suffix, payload, retain) = match event {
        BusEvent::DeviceCommand {
            room,
            device,
            payload,
        } => (room, device, "set", payload.clone(), false),
        BusEvent::DeviceAdded { room, device } => {
            (room, device, "availability", "online".to_string(), true)
        }
        BusEvent::DeviceRemoved { room, device } => {
            (room, device, "availability", "offline".to_string(), true)
        }
    };
    Outgoing {
        topic: format!("{}/{}/{}/{}", prefix, room, device, suffix),
        payload,
        retain,
    }
}

pub struct MqttAdapter {
    state: Arc<RwLock<MqttState>>,
    client: Arc<RwLock<Option<AsyncClient>>>,
    bus: SharedBus,
    shutdown: CancellationToken,
}

impl MqttAdapter {
    pub fn new(bus: SharedBus) -> Self {
        Self {
            state: Arc::new(RwLock::new(MqttState::default())),
            client: Arc::new(RwLock::new(None)),
            bus,
            shutdown: CancellationToken::new(),
        }
    }

    pub async fn configure(
        &self,
        host: String,
        port: Option<u16>,
        username: Option<String>,
        password: Option<String>,
        topic_prefix: Option<String>,
    ) {
        let mut state = self.state.write().await;
        state.host = Some(host);
        state.port = port.unwrap_or(DEFAULT_PORT);
        state.username = username;
        state.password = password;
        if let Some(prefix) = topic_prefix {
            state.topic_prefix = prefix;
        }
    }

    pub async fn is_configured(&self) -> bool {
        self.state.read().await.host.is_some()
    }

    pub async fn get_status(&self) -> MqttStatus {
        let state = self.state.read().await;
        MqttStatus {
            connected: state.connected,
            host: state.host.clone(),
            port: state.port,
            topic_prefix: state.topic_prefix.clone(),
        }
    }

    /// Connect and start forwarding bus events.
    pub async fn start(&self) -> Result<()> {
        let (host, port, username, password, topic_prefix) = {
            let state = self.state.read().await;
            let host = state
                .host
                .clone()
                .ok_or_else(|| anyhow!("MQTT host not configured"))?;
            (
                host,
                state.port,
                state.username.clone(),
                state.password.clone(),
                state.topic_prefix.clone(),
            )
        };

        let mut options = MqttOptions::new(CLIENT_ID, &host, port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(user), Some(pass)) = (&username, &password) {
            options.set_credentials(user, pass);
        }

        let (client, mut eventloop) = AsyncClient::new(options, 100);
        *self.client.write().await = Some(client);

        tracing::info!("MQTT connecting to {}:{}...", host, port);

        // Connection driver. rumqttc reconnects on the next poll after an error.
        let state = self.state.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("MQTT event loop shutting down");
                        break;
                    }
                    result = eventloop.poll() => match result {
                        Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                            tracing::info!("MQTT connected (code: {:?})", ack.code);
                            state.write().await.connected = true;
                        }
                        Ok(Event::Incoming(Incoming::Disconnect)) => {
                            tracing::warn!("MQTT disconnected");
                            state.write().await.connected = false;
                        }
                        Err(e) => {
                            tracing::error!("MQTT error: {}", e);
                            state.write().await.connected = false;
                            tokio::select! {
                                _ = shutdown.cancelled() => break,
                                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                            }
                        }
                        _ => {}
                    }
                }
            }
        });

        // Bus forwarder
        let client = self.client.clone();
        let mut rx = self.bus.subscribe();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("MQTT bus forwarder shutting down");
                        break;
                    }
                    result = rx.recv() => match result {
                        Ok(event) => {
                            let message = outgoing_for(&topic_prefix, &event);
                            let client = client.read().await.clone();
                            if let Some(client) = client {
                                if let Err(e) = Self::publish_message(&client, &message).await {
                                    tracing::warn!("MQTT publish to {} failed: {}", message.topic, e);
                                }
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!("MQTT forwarder lagged, {} notification(s) dropped", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        });

        Ok(())
    }

    async fn publish_message(client: &AsyncClient, message: &Outgoing) -> Result<()> {
        client
            .publish(
                &message.topic,
                QoS::AtMostOnce,
                message.retain,
                message.payload.as_bytes(),
            )
            .await?;
        tracing::debug!("MQTT published {} -> {}", message.topic, message.payload);
        Ok(())
    }

    pub async fn stop(&self) {
        self.shutdown.cancel();

        if let Some(client) = self.client.write().await.take() {
            if let Err(e) = client.disconnect().await {
                tracing::debug!("MQTT disconnect: {}", e);
            }
        }
        self.state.write().await.connected = false;

        tracing::info!("MQTT adapter stopped");
    }
}
