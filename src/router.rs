//! Command router
//!
//! Every tool lands here. A mutating command goes through the same steps:
//! normalize the room, resolve the device, check the capability, parse the
//! parameters, run it under the device's own lock, then on success announce
//! it on the bus and snapshot the registry. Announce and snapshot failures
//! are logged and never change the outcome.

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;

use crate::bus::{BusEvent, SharedBus};
use crate::devices::channel::{ChannelFactory, RemoteKey};
use crate::devices::television::{
    App, AppProfile, Direction, Television, TvEndpoint, TvState, CHANNEL_TIMEOUT,
};
use crate::devices::{Capability, Command, Device, DeviceKind, DeviceRecord, Power};
use crate::error::{HubError, HubResult};
use crate::registry::{normalize_room, DeviceSlot, Registry, TvLink};
use crate::store::StateStore;

/// Summary row of `list_tv_devices`.
#[derive(Debug, Clone, Serialize)]
pub struct TvSummary {
    pub room: String,
    pub name: String,
    pub ip_address: String,
    pub port: u16,
    pub connected: bool,
    pub power: Power,
    pub current_app: App,
    pub volume: u8,
    pub muted: bool,
}

/// A resolved device.
struct Target {
    room: String,
    name: String,
    slot: Arc<DeviceSlot>,
}

pub struct CommandRouter {
    registry: Arc<Registry>,
    store: Arc<StateStore>,
    channels: Arc<dyn ChannelFactory>,
    bus: SharedBus,
}

impl CommandRouter {
    pub fn new(
        registry: Arc<Registry>,
        store: Arc<StateStore>,
        channels: Arc<dyn ChannelFactory>,
        bus: SharedBus,
    ) -> Self {
        Self {
            registry,
            store,
            channels,
            bus,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    // ---------------------------------------------------------------------
    // Generic devices
    // ---------------------------------------------------------------------

    pub async fn turn_on_device(&self, room: &str, device: &str) -> HubResult<String> {
        self.switch(room, device, Power::On).await
    }

    pub async fn turn_off_device(&self, room: &str, device: &str) -> HubResult<String> {
        self.switch(room, device, Power::Off).await
    }

    async fn switch(&self, room: &str, device: &str, power: Power) -> HubResult<String> {
        let target = self.resolve(room, device).await?;
        self.dispatch(&target, Capability::Power, || Ok(Command::Power(power)))
            .await?;
        Ok(format!(
            "{} in {} is now {}.",
            target.name, target.room, power
        ))
    }

    pub async fn set_device_value(
        &self,
        room: &str,
        device: &str,
        key: &str,
        value: &str,
    ) -> HubResult<String> {
        let target = self.resolve(room, device).await?;
        let capability = Capability::for_setting(key)
            .ok_or_else(|| HubError::unsupported(&target.name, format!("set_{}", key.trim())))?;

        let command = self
            .dispatch(&target, capability, || Command::setting(capability, value))
            .await?;
        let applied = match &command {
            Command::SetBrightness(v) | Command::SetSpeed(v) => v.to_string(),
            Command::SetTemperature(v) => v.to_string(),
            Command::SetMode(v) => v.clone(),
            _ => value.to_string(),
        };
        Ok(format!(
            "{} for {} in {} set to {}.",
            key.trim().to_lowercase(),
            target.name,
            target.room,
            applied
        ))
    }

    pub async fn get_device_state(&self, room: &str, device: &str) -> HubResult<String> {
        let target = self.resolve(room, device).await?;
        to_json(&target.slot.record().await)
    }

    pub async fn get_all_states(&self) -> HubResult<String> {
        to_json(&self.registry.records().await)
    }

    // ---------------------------------------------------------------------
    // Television remote
    // ---------------------------------------------------------------------

    pub async fn tv_volume_up(&self, room: &str, device: &str) -> HubResult<String> {
        let target = self.resolve(room, device).await?;
        let record = self.run(&target, Command::VolumeUp).await?;
        Ok(format!("TV volume increased. Current volume: {}", tv_state(&record).volume))
    }

    pub async fn tv_volume_down(&self, room: &str, device: &str) -> HubResult<String> {
        let target = self.resolve(room, device).await?;
        let record = self.run(&target, Command::VolumeDown).await?;
        Ok(format!("TV volume decreased. Current volume: {}", tv_state(&record).volume))
    }

    pub async fn tv_mute(&self, room: &str, device: &str) -> HubResult<String> {
        let target = self.resolve(room, device).await?;
        let record = self.run(&target, Command::Mute).await?;
        let status = if tv_state(&record).muted { "muted" } else { "unmuted" };
        Ok(format!("TV is now {}.", status))
    }

    pub async fn tv_open_app(&self, room: &str, device: &str, app: &str) -> HubResult<String> {
        let target = self.resolve(room, device).await?;
        let command = self
            .dispatch(&target, Capability::OpenApp, || {
                App::parse(app).map(Command::OpenApp).ok_or_else(|| {
                    HubError::invalid(format!(
                        "App '{}' not supported. Available: netflix, youtube, home",
                        app
                    ))
                })
            })
            .await?;
        match command {
            Command::OpenApp(App::Home) => Ok("Navigated to TV home screen.".to_string()),
            Command::OpenApp(app) => Ok(format!("Opened {} on TV.", app)),
            _ => Ok(format!("Opened {} on TV.", app)),
        }
    }

    pub async fn tv_navigate(
        &self,
        room: &str,
        device: &str,
        direction: &str,
        steps: Option<i64>,
    ) -> HubResult<String> {
        let target = self.resolve(room, device).await?;
        // Out-of-range counts saturate and are rejected by the television
        let steps = u8::try_from(steps.unwrap_or(1)).unwrap_or(u8::MAX);
        self.dispatch(&target, Capability::Navigate, || {
            let direction = Direction::parse(direction).ok_or_else(|| {
                HubError::invalid(format!(
                    "Invalid direction '{}'. Use: {}",
                    direction,
                    Direction::ACCEPTED
                ))
            })?;
            Ok(Command::Navigate { direction, steps })
        })
        .await?;
        Ok(format!(
            "Navigated {} {} time(s) on TV.",
            direction.trim().to_lowercase(),
            steps
        ))
    }

    pub async fn tv_send_text(&self, room: &str, device: &str, text: &str) -> HubResult<String> {
        let target = self.resolve(room, device).await?;
        self.dispatch(&target, Capability::SendText, || {
            Ok(Command::SendText(text.to_string()))
        })
        .await?;
        Ok(format!("Sent text '{}' to TV.", text))
    }

    pub async fn tv_press_key(&self, room: &str, device: &str, key: &str) -> HubResult<String> {
        let target = self.resolve(room, device).await?;
        self.dispatch(&target, Capability::PressKey, || {
            RemoteKey::parse(key).map(Command::PressKey).ok_or_else(|| {
                HubError::invalid(format!(
                    "Unknown key '{}'. Available: {}",
                    key,
                    RemoteKey::PRESSABLE
                ))
            })
        })
        .await?;
        Ok(format!("Pressed '{}' key on TV remote.", key.trim().to_lowercase()))
    }

    pub async fn tv_search_and_play(
        &self,
        room: &str,
        device: &str,
        query: &str,
        app: Option<&str>,
    ) -> HubResult<String> {
        let app = self.search(room, device, query, app, true).await?;
        Ok(format!("Searching and playing '{}' on {}.", query, app))
    }

    pub async fn tv_search_content(
        &self,
        room: &str,
        device: &str,
        query: &str,
        app: Option<&str>,
    ) -> HubResult<String> {
        let app = self.search(room, device, query, app, false).await?;
        Ok(format!("Searched for '{}' on {}. Results are on screen.", query, app))
    }

    async fn search(
        &self,
        room: &str,
        device: &str,
        query: &str,
        app: Option<&str>,
        autoplay: bool,
    ) -> HubResult<App> {
        let target = self.resolve(room, device).await?;
        let capability = if autoplay {
            Capability::SearchAndPlay
        } else {
            Capability::SearchContent
        };
        let command = self
            .dispatch(&target, capability, || {
                let name = app.unwrap_or("netflix");
                let app = App::parse(name)
                    .filter(|app| AppProfile::for_app(*app).is_some())
                    .ok_or_else(|| {
                        HubError::invalid(format!(
                            "Search is not available for '{}'. Use netflix or youtube",
                            name
                        ))
                    })?;
                Ok(Command::Search {
                    query: query.to_string(),
                    app,
                    autoplay,
                })
            })
            .await?;
        match command {
            Command::Search { app, .. } => Ok(app),
            _ => Ok(App::Unknown),
        }
    }

    // ---------------------------------------------------------------------
    // Television connection checks
    // ---------------------------------------------------------------------

    pub async fn check_tv_connection(&self, room: &str, device: &str) -> HubResult<String> {
        let target = self.resolve(room, device).await?;
        let (record, link) = self.tv_link(&target, "check_tv_connection").await?;

        if alive(&link).await {
            let state = to_json(&record.state)?;
            Ok(format!("TV connection is active. Status: {}", state))
        } else {
            Ok(format!(
                "TV is not connected at {}. Make sure the TV is on, ADB debugging is enabled, and the IP address is correct.",
                link.endpoint
            ))
        }
    }

    pub async fn diagnose_tv_connection(&self, room: &str, device: &str) -> HubResult<String> {
        let target = self.resolve(room, device).await?;
        let (_, link) = self.tv_link(&target, "diagnose_tv_connection").await?;

        let mut report = vec![format!(
            "Diagnosing TV {} in {} ({})",
            target.name, target.room, link.endpoint
        )];

        if link.endpoint.reachable().await {
            report.push("1. Network: reachable".to_string());
        } else {
            report.push("1. Network: NOT reachable. Check the IP address and that the TV is powered on.".to_string());
            return Ok(report.join("\n"));
        }

        if alive(&link).await {
            report.push("2. Remote channel: connected".to_string());
        } else {
            report.push("2. Remote channel: NOT connected. Enable network debugging on the TV and accept the connection prompt.".to_string());
            return Ok(report.join("\n"));
        }

        for (i, profile) in AppProfile::all().iter().enumerate() {
            let line = match tokio::time::timeout(
                CHANNEL_TIMEOUT,
                link.channel.package_installed(profile.package),
            )
            .await
            {
                Ok(Ok(true)) => format!("{}. {}: installed", i + 3, profile.app),
                Ok(Ok(false)) => format!("{}. {}: not installed", i + 3, profile.app),
                Ok(Err(e)) => format!("{}. {}: check failed ({})", i + 3, profile.app, e),
                Err(_) => format!("{}. {}: check timed out", i + 3, profile.app),
            };
            report.push(line);
        }
        Ok(report.join("\n"))
    }

    pub async fn list_tv_devices(&self) -> HubResult<String> {
        let mut tvs = Vec::new();
        for (room, name, slot) in self.registry.list_all().await {
            let committed = slot.committed().await;
            if let Some(link) = committed.tv {
                tvs.push((room, name, committed.record, link));
            }
        }
        if tvs.is_empty() {
            return Ok("No TV devices configured. Use add_tv_device to add one.".to_string());
        }

        let statuses = join_all(tvs.iter().map(|(_, _, _, link)| alive(link))).await;
        let summaries: Vec<TvSummary> = tvs
            .into_iter()
            .zip(statuses)
            .map(|((room, name, record, link), connected)| {
                let state = tv_state(&record);
                TvSummary {
                    room,
                    name,
                    ip_address: link.endpoint.ip_address.to_string(),
                    port: link.endpoint.port,
                    connected,
                    power: state.power,
                    current_app: state.current_app,
                    volume: state.volume,
                    muted: state.muted,
                }
            })
            .collect();
        to_json(&summaries)
    }

    // ---------------------------------------------------------------------
    // Television configuration
    // ---------------------------------------------------------------------

    pub async fn add_tv_device(
        &self,
        room: &str,
        device: &str,
        ip_address: &str,
        port: i64,
    ) -> HubResult<String> {
        let endpoint = TvEndpoint::parse(ip_address, port)?;
        let room = normalize_room(room);

        let tv = Television::new(endpoint, self.channels.open(&endpoint));
        let slot = self
            .registry
            .insert_new(Device::television(device, &room, tv))
            .await?;
        tracing::info!("Added TV {} in {} at {}", device, room, endpoint);

        self.bus.publish(BusEvent::DeviceAdded {
            room: room.clone(),
            device: device.to_string(),
        });
        self.persist().await;

        let connected = match slot.committed().await.tv {
            Some(link) => alive(&link).await,
            None => false,
        };
        Ok(format!(
            "TV '{}' added to {} at {}. Status: {}",
            device,
            room,
            endpoint,
            connection_label(connected)
        ))
    }

    pub async fn update_tv_config(
        &self,
        room: &str,
        device: &str,
        ip_address: &str,
        port: i64,
    ) -> HubResult<String> {
        let target = self.resolve(room, device).await?;
        let endpoint = TvEndpoint::parse(ip_address, port)?;
        if target.slot.kind() != DeviceKind::Television {
            return Err(HubError::unsupported(&target.name, "update_tv_config"));
        }

        let (previous, link) = {
            let mut device = target.slot.lock().await;
            let previous = match device.as_television_mut() {
                Some(tv) => {
                    let previous = tv.endpoint();
                    tv.reconfigure(endpoint, self.channels.open(&endpoint));
                    previous
                }
                None => return Err(HubError::unsupported(&target.name, "update_tv_config")),
            };
            target.slot.commit(&device).await;
            (previous, target.slot.committed().await.tv)
        };
        tracing::info!(
            "Updated TV {} in {}: {} -> {}",
            target.name,
            target.room,
            previous,
            endpoint
        );
        self.persist().await;

        let connected = match link {
            Some(link) => alive(&link).await,
            None => false,
        };
        Ok(format!(
            "TV '{}' in {} updated from {} to {}. Status: {}",
            target.name,
            target.room,
            previous,
            endpoint,
            connection_label(connected)
        ))
    }

    pub async fn remove_tv_device(&self, room: &str, device: &str) -> HubResult<String> {
        let target = self.resolve(room, device).await?;
        if target.slot.kind() != DeviceKind::Television {
            return Err(HubError::unsupported(&target.name, "remove_tv_device"));
        }
        if !self.registry.remove(&target.room, &target.name).await {
            return Err(HubError::not_found(room, device));
        }
        tracing::info!("Removed TV {} from {}", target.name, target.room);

        self.bus.publish(BusEvent::DeviceRemoved {
            room: target.room.clone(),
            device: target.name.clone(),
        });
        self.persist().await;
        Ok(format!("TV '{}' removed from {}.", target.name, target.room))
    }

    pub async fn load_tv_configs_from_file(&self) -> HubResult<String> {
        let Some(file) = self.store.load_tv_endpoints()? else {
            return Ok(format!(
                "No TV configuration file found at {}.",
                self.store.tv_config_path().display()
            ));
        };
        let skipped = file.skipped.clone();
        let mut report = self
            .registry
            .apply_tv_config(file, self.channels.as_ref(), true)
            .await;
        report.errors.extend(skipped);

        if report.added + report.updated > 0 {
            self.persist().await;
        }

        let mut message = format!(
            "Loaded TV configuration: {} added, {} updated, {} error(s).",
            report.added,
            report.updated,
            report.errors.len()
        );
        for error in &report.errors {
            message.push_str("\n- ");
            message.push_str(error);
        }
        Ok(message)
    }

    // ---------------------------------------------------------------------
    // Plumbing
    // ---------------------------------------------------------------------

    async fn resolve(&self, room: &str, device: &str) -> HubResult<Target> {
        let canonical = normalize_room(room);
        let name = device.trim();
        let slot = self
            .registry
            .get(&canonical, name)
            .await
            .ok_or_else(|| HubError::not_found(&canonical, name))?;
        Ok(Target {
            room: canonical,
            name: name.to_string(),
            slot,
        })
    }

    /// Capability check, then parameter parsing, then [`Self::run`].
    /// Returns the command that was applied.
    async fn dispatch(
        &self,
        target: &Target,
        capability: Capability,
        build: impl FnOnce() -> HubResult<Command>,
    ) -> HubResult<Command> {
        if !target.slot.kind().supports(capability) {
            return Err(HubError::unsupported(&target.name, capability));
        }
        let command = build()?;
        self.run(target, command.clone()).await?;
        Ok(command)
    }

    async fn run(&self, target: &Target, command: Command) -> HubResult<DeviceRecord> {
        if !target.slot.kind().supports(command.capability()) {
            return Err(HubError::unsupported(&target.name, command.capability()));
        }

        let (result, record) = {
            let mut device = target.slot.lock().await;
            let result = device.apply(&command).await;
            // Partial effects of a failed command stay visible to readers
            let record = target.slot.commit(&device).await;
            (result, record)
        };

        if let Err(e) = result {
            tracing::warn!(
                "{:?} on {} in {} failed: {}",
                command,
                target.name,
                target.room,
                e
            );
            return Err(e);
        }
        tracing::debug!("{:?} applied to {} in {}", command, target.name, target.room);

        if let Some(payload) = command.notification() {
            self.bus
                .publish(BusEvent::command(&target.room, &target.name, payload));
        }
        self.persist().await;
        Ok(record)
    }

    async fn tv_link(&self, target: &Target, operation: &str) -> HubResult<(DeviceRecord, TvLink)> {
        let committed = target.slot.committed().await;
        match committed.tv {
            Some(link) => Ok((committed.record, link)),
            None => Err(HubError::unsupported(&target.name, operation)),
        }
    }

    async fn persist(&self) {
        if let Err(e) = self.store.snapshot(&self.registry).await {
            tracing::warn!("{}", e);
        }
    }
}

async fn alive(link: &TvLink) -> bool {
    tokio::time::timeout(CHANNEL_TIMEOUT, link.channel.is_alive())
        .await
        .unwrap_or(false)
}

fn connection_label(connected: bool) -> &'static str {
    if connected {
        "Connected"
    } else {
        "Not connected (will retry on next command)"
    }
}

/// Television state out of a record; defaults if the record is not a TV.
fn tv_state(record: &DeviceRecord) -> TvState {
    serde_json::from_value(serde_json::Value::Object(record.state.clone())).unwrap_or_default()
}

fn to_json<T: Serialize>(value: &T) -> HubResult<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| HubError::invalid(format!("state is not serializable: {}", e)))
}
