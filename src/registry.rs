//! Device registry - owns every device, keyed by `(room, name)`
//!
//! Locking:
//! - the room map sits behind a `RwLock` that is only held for lookups and
//!   structural changes, never across a device call
//! - each device has its own `Mutex`, so mutations of one device serialize
//!   while other devices proceed
//! - each slot keeps the last committed record (plus the television link),
//!   so state queries and snapshots never wait on a device that is busy
//!   talking to its remote channel

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};

use crate::devices::channel::{ChannelFactory, SharedChannel};
use crate::devices::television::{Television, TvEndpoint};
use crate::devices::{Device, DeviceKind, DeviceRecord};
use crate::error::{HubError, HubResult};
use crate::store::{Snapshot, StateStore, TvConfig, TvConfigEntry};

/// Room name variants and their canonical key.
const ROOM_ALIASES: &[(&str, &str)] = &[
    ("living room", "livingroom"),
    ("living_room", "livingroom"),
    ("lounge", "livingroom"),
    ("hall", "livingroom"),
    ("bed room", "bedroom"),
    ("bed_room", "bedroom"),
    ("master bedroom", "bedroom"),
    ("kitchen", "kitchen"),
    ("cook room", "kitchen"),
];

/// Lower-case and trim, then map through the alias table. Unknown names
/// are taken as already canonical.
pub fn normalize_room(input: &str) -> String {
    let room = input.trim().to_lowercase();
    ROOM_ALIASES
        .iter()
        .find(|(alias, _)| *alias == room)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(room)
}

/// Remote channel handle of a television, readable without its device lock.
#[derive(Clone)]
pub struct TvLink {
    pub endpoint: TvEndpoint,
    pub channel: SharedChannel,
}

/// Last committed view of a device.
#[derive(Clone)]
pub struct Committed {
    pub record: DeviceRecord,
    pub tv: Option<TvLink>,
}

impl Committed {
    fn of(device: &Device) -> Self {
        Self {
            record: device.describe(),
            tv: device.as_television().map(|tv| TvLink {
                endpoint: tv.endpoint(),
                channel: tv.channel(),
            }),
        }
    }
}

pub struct DeviceSlot {
    kind: DeviceKind,
    device: Mutex<Device>,
    committed: RwLock<Committed>,
}

impl fmt::Debug for DeviceSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSlot").field("kind", &self.kind).finish_non_exhaustive()
    }
}

impl DeviceSlot {
    fn new(device: Device) -> Self {
        Self {
            kind: device.kind(),
            committed: RwLock::new(Committed::of(&device)),
            device: Mutex::new(device),
        }
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Exclusive access for a mutation. Call [`DeviceSlot::commit`] before
    /// releasing the guard.
    pub async fn lock(&self) -> MutexGuard<'_, Device> {
        self.device.lock().await
    }

    /// Publish the device's current state to readers.
    pub async fn commit(&self, device: &Device) -> DeviceRecord {
        let committed = Committed::of(device);
        let record = committed.record.clone();
        *self.committed.write().await = committed;
        record
    }

    pub async fn committed(&self) -> Committed {
        self.committed.read().await.clone()
    }

    pub async fn record(&self) -> DeviceRecord {
        self.committed.read().await.record.clone()
    }
}

type Rooms = BTreeMap<String, BTreeMap<String, Arc<DeviceSlot>>>;

/// Outcome of applying TV config entries.
#[derive(Debug, Default)]
pub struct TvConfigReport {
    pub added: usize,
    pub updated: usize,
    pub errors: Vec<String>,
}

#[derive(Default)]
pub struct Registry {
    rooms: RwLock<Rooms>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The fixed house layout the hub starts with.
    pub fn with_default_layout() -> Self {
        let devices = [
            Device::light("light1", "kitchen"),
            Device::light("light2", "kitchen"),
            Device::ventilation("chimney", "kitchen"),
            Device::light("light3", "livingroom"),
            Device::light("light4", "livingroom"),
            Device::light("light5", "livingroom"),
            Device::fan("fan1", "livingroom"),
            Device::climate("ac1", "bedroom"),
            Device::fan("fan2", "bedroom"),
            Device::light("light76", "bedroom"),
        ];

        let mut rooms = Rooms::new();
        for device in devices {
            rooms
                .entry(device.room().to_string())
                .or_default()
                .insert(device.name().to_string(), Arc::new(DeviceSlot::new(device)));
        }
        Self {
            rooms: RwLock::new(rooms),
        }
    }

    /// Startup sequence: default layout, then televisions from the TV
    /// config, then persisted device state. Failures at each step are
    /// logged and skipped.
    pub async fn bootstrap(store: &StateStore, channels: &dyn ChannelFactory) -> Self {
        let registry = Self::with_default_layout();

        match store.load_tv_endpoints() {
            Ok(Some(config)) => {
                let report = registry.apply_tv_config(config, channels, false).await;
                tracing::info!("Loaded {} TV(s) from config", report.added);
                for error in &report.errors {
                    tracing::warn!("TV config: {}", error);
                }
            }
            Ok(None) => {
                tracing::info!("No TV configuration file found. Use add_tv_device to configure TVs.")
            }
            Err(e) => tracing::warn!("Could not load TV config: {}", e),
        }

        match store.load_snapshot() {
            Ok(Some(snapshot)) => registry.restore(&snapshot).await,
            Ok(None) => {}
            Err(e) => tracing::warn!("Could not load device snapshot: {}", e),
        }

        registry
    }

    pub async fn get(&self, room: &str, name: &str) -> Option<Arc<DeviceSlot>> {
        let room = normalize_room(room);
        let rooms = self.rooms.read().await;
        rooms.get(&room).and_then(|devices| devices.get(name)).cloned()
    }

    /// Insert or replace. The room bucket is created on demand.
    pub async fn put(&self, mut device: Device) -> Arc<DeviceSlot> {
        let room = normalize_room(device.room());
        device.set_room(room.clone());
        let name = device.name().to_string();
        let slot = Arc::new(DeviceSlot::new(device));
        self.rooms
            .write()
            .await
            .entry(room)
            .or_default()
            .insert(name, slot.clone());
        slot
    }

    /// Insert only if `(room, name)` is free.
    pub async fn insert_new(&self, mut device: Device) -> HubResult<Arc<DeviceSlot>> {
        let room = normalize_room(device.room());
        device.set_room(room.clone());
        let name = device.name().to_string();

        let mut rooms = self.rooms.write().await;
        let bucket = rooms.entry(room.clone()).or_default();
        if bucket.contains_key(&name) {
            return Err(HubError::DeviceExists { room, device: name });
        }
        let slot = Arc::new(DeviceSlot::new(device));
        bucket.insert(name, slot.clone());
        Ok(slot)
    }

    /// `false` if there was nothing to remove.
    pub async fn remove(&self, room: &str, name: &str) -> bool {
        let room = normalize_room(room);
        let mut rooms = self.rooms.write().await;
        rooms
            .get_mut(&room)
            .and_then(|devices| devices.remove(name))
            .is_some()
    }

    /// All devices ordered by room, then name.
    pub async fn list_all(&self) -> Vec<(String, String, Arc<DeviceSlot>)> {
        let rooms = self.rooms.read().await;
        rooms
            .iter()
            .flat_map(|(room, devices)| {
                devices
                    .iter()
                    .map(move |(name, slot)| (room.clone(), name.clone(), slot.clone()))
            })
            .collect()
    }

    /// Committed records of every device, grouped by room.
    pub async fn records(&self) -> Snapshot {
        // Empty rooms stay in the snapshot
        let mut snapshot: Snapshot = {
            let rooms = self.rooms.read().await;
            rooms.keys().map(|room| (room.clone(), BTreeMap::new())).collect()
        };
        for (room, name, slot) in self.list_all().await {
            snapshot.entry(room).or_default().insert(name, slot.record().await);
        }
        snapshot
    }

    /// Endpoints of every television, grouped by room.
    pub async fn tv_endpoints(&self) -> TvConfig {
        let mut config = TvConfig::new();
        for (room, name, slot) in self.list_all().await {
            if let Some(link) = slot.committed().await.tv {
                config.entry(room).or_default().insert(name, link.endpoint);
            }
        }
        config
    }

    /// Create televisions for config entries. Existing televisions get the
    /// new endpoint only with `update_existing`; a non-television under the
    /// same key is never touched.
    pub async fn apply_tv_config(
        &self,
        entries: impl IntoIterator<Item = TvConfigEntry>,
        channels: &dyn ChannelFactory,
        update_existing: bool,
    ) -> TvConfigReport {
        let mut report = TvConfigReport::default();

        for entry in entries {
            let room = normalize_room(&entry.room);
            match self.get(&room, &entry.name).await {
                Some(slot) if slot.kind() != DeviceKind::Television => {
                    report
                        .errors
                        .push(format!("Device {} in {} is not a TV", entry.name, room));
                }
                Some(slot) if update_existing => {
                    let mut device = slot.lock().await;
                    if let Some(tv) = device.as_television_mut() {
                        tv.reconfigure(entry.endpoint, channels.open(&entry.endpoint));
                    }
                    slot.commit(&device).await;
                    report.updated += 1;
                }
                Some(_) => {
                    tracing::debug!("TV {} in {} already present, keeping it", entry.name, room);
                }
                None => {
                    let tv = Television::new(entry.endpoint, channels.open(&entry.endpoint));
                    match self.insert_new(Device::television(&entry.name, &room, tv)).await {
                        Ok(_) => {
                            tracing::info!("Loaded TV: {} in {} ({})", entry.name, room, entry.endpoint);
                            report.added += 1;
                        }
                        Err(e) => report.errors.push(e.to_string()),
                    }
                }
            }
        }
        report
    }

    /// Apply persisted state to devices that exist now.
    pub async fn restore(&self, snapshot: &Snapshot) {
        for (room, devices) in snapshot {
            for (name, record) in devices {
                let Some(slot) = self.get(room, name).await else {
                    tracing::debug!("Persisted {}/{} has no live device, skipping", room, name);
                    continue;
                };
                let mut device = slot.lock().await;
                match device.restore(record) {
                    Ok(()) => {
                        slot.commit(&device).await;
                    }
                    Err(e) => tracing::warn!("Not restoring {}/{}: {}", room, name, e),
                }
            }
        }
    }
}
