//! State store - persists device state and TV endpoints as JSON
//!
//! Two files live in the state directory:
//! - `devices.json`: room -> device name -> device record
//! - `tv_config.json`: room -> TV name -> `{ ip_address, port }`
//!
//! Both are rewritten whole after every successful mutation. Each write goes
//! to a temp file first and is renamed over the target, so a reader never
//! sees a half-written file.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::devices::television::{TvEndpoint, DEFAULT_ADB_PORT};
use crate::devices::DeviceRecord;
use crate::error::{HubError, HubResult};
use crate::registry::Registry;

const DEVICES_FILE: &str = "devices.json";
const TV_CONFIG_FILE: &str = "tv_config.json";

/// room -> device name -> record
pub type Snapshot = BTreeMap<String, BTreeMap<String, DeviceRecord>>;

/// room -> TV name -> endpoint
pub type TvConfig = BTreeMap<String, BTreeMap<String, TvEndpoint>>;

/// One usable entry of the TV config file.
#[derive(Debug, Clone, PartialEq)]
pub struct TvConfigEntry {
    pub room: String,
    pub name: String,
    pub endpoint: TvEndpoint,
}

/// Entries read from the TV config file plus the ones that were skipped.
#[derive(Debug, Default)]
pub struct TvConfigFile {
    pub entries: Vec<TvConfigEntry>,
    pub skipped: Vec<String>,
}

impl IntoIterator for TvConfigFile {
    type Item = TvConfigEntry;
    type IntoIter = std::vec::IntoIter<TvConfigEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

pub struct StateStore {
    dir: PathBuf,
    // Serializes snapshot writers
    write_lock: Mutex<()>,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn devices_path(&self) -> PathBuf {
        self.dir.join(DEVICES_FILE)
    }

    pub fn tv_config_path(&self) -> PathBuf {
        self.dir.join(TV_CONFIG_FILE)
    }

    /// Write the committed state of every device plus every TV endpoint.
    pub async fn snapshot(&self, registry: &Registry) -> HubResult<()> {
        let _guard = self.write_lock.lock().await;

        let devices = registry.records().await;
        let tvs = registry.tv_endpoints().await;

        write_json_atomic(&self.devices_path(), &devices)?;
        write_json_atomic(&self.tv_config_path(), &tvs)?;

        tracing::debug!("Saved state for {} room(s) to {:?}", devices.len(), self.dir);
        Ok(())
    }

    /// `None` when no snapshot has been written yet.
    pub fn load_snapshot(&self) -> HubResult<Option<Snapshot>> {
        let Some(content) = read_optional(&self.devices_path())? else {
            return Ok(None);
        };
        let snapshot = serde_json::from_str(&content)
            .map_err(|e| HubError::PersistenceFailure(format!("{}: {}", DEVICES_FILE, e)))?;
        Ok(Some(snapshot))
    }

    /// Read the TV config file. `None` when it does not exist. Malformed
    /// entries are skipped and reported, the rest still load.
    pub fn load_tv_endpoints(&self) -> HubResult<Option<TvConfigFile>> {
        let Some(content) = read_optional(&self.tv_config_path())? else {
            return Ok(None);
        };
        let rooms: Map<String, Value> = serde_json::from_str(&content)
            .map_err(|e| HubError::PersistenceFailure(format!("{}: {}", TV_CONFIG_FILE, e)))?;

        let mut file = TvConfigFile::default();
        for (room, tvs) in rooms {
            let Value::Object(tvs) = tvs else {
                file.skip(format!("room {} is not an object", room));
                continue;
            };
            for (name, entry) in tvs {
                match parse_entry(&entry) {
                    Ok(endpoint) => file.entries.push(TvConfigEntry {
                        room: room.clone(),
                        name,
                        endpoint,
                    }),
                    Err(e) => file.skip(format!("{} in {}: {}", name, room, e)),
                }
            }
        }
        Ok(Some(file))
    }
}

impl TvConfigFile {
    fn skip(&mut self, reason: String) {
        tracing::warn!("Skipping TV config entry: {}", reason);
        self.skipped.push(reason);
    }
}

fn parse_entry(entry: &Value) -> HubResult<TvEndpoint> {
    let ip = entry
        .get("ip_address")
        .and_then(Value::as_str)
        .ok_or_else(|| HubError::invalid("missing ip_address"))?;
    let port = match entry.get("port") {
        None => i64::from(DEFAULT_ADB_PORT),
        Some(port) => port
            .as_i64()
            .ok_or_else(|| HubError::invalid("port is not a number"))?,
    };
    TvEndpoint::parse(ip, port)
}

fn read_optional(path: &Path) -> HubResult<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(HubError::PersistenceFailure(format!("{:?}: {}", path, e))),
    }
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> HubResult<()> {
    let fail = |e: &dyn std::fmt::Display| HubError::PersistenceFailure(format!("{:?}: {}", path, e));

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| fail(&e))?;
    }
    let json = serde_json::to_string_pretty(value).map_err(|e| fail(&e))?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(|e| fail(&e))?;
    fs::rename(&tmp, path).map_err(|e| fail(&e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::channel::{
        ChannelError, ChannelFactory, Launch, RemoteChannel, RemoteKey, SharedChannel,
    };
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Offline;

    #[async_trait]
    impl RemoteChannel for Offline {
        async fn send_key(&self, _key: RemoteKey) -> Result<(), ChannelError> {
            Err(ChannelError::Unreachable("offline".into()))
        }
        async fn send_text(&self, _text: &str) -> Result<(), ChannelError> {
            Err(ChannelError::Unreachable("offline".into()))
        }
        async fn launch(&self, _launch: Launch) -> Result<(), ChannelError> {
            Err(ChannelError::Unreachable("offline".into()))
        }
        async fn is_alive(&self) -> bool {
            false
        }
        async fn package_installed(&self, _package: &str) -> Result<bool, ChannelError> {
            Ok(false)
        }
    }

    impl ChannelFactory for Offline {
        fn open(&self, _endpoint: &TvEndpoint) -> SharedChannel {
            Arc::new(Offline)
        }
    }

    #[tokio::test]
    async fn snapshot_then_bootstrap_restores_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());

        let registry = Registry::with_default_layout();
        let slot = registry.get("kitchen", "light1").await.unwrap();
        {
            let mut device = slot.lock().await;
            device
                .apply(&crate::devices::Command::SetBrightness(40))
                .await
                .unwrap();
            slot.commit(&device).await;
        }
        store.snapshot(&registry).await.unwrap();

        let restored = Registry::bootstrap(&store, &Offline).await;
        let record = restored.get("kitchen", "light1").await.unwrap().record().await;
        assert_eq!(record.state["brightness"], 40);
        assert_eq!(restored.records().await, registry.records().await);
    }

    #[test]
    fn missing_files_load_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("never-created"));
        assert!(store.load_snapshot().unwrap().is_none());
        assert!(store.load_tv_endpoints().unwrap().is_none());
    }

    #[test]
    fn malformed_tv_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        fs::write(
            store.tv_config_path(),
            r#"{
                "livingroom": {
                    "tv": {"ip_address": "192.168.1.20"},
                    "broken": {"ip_address": "999.1.1.1", "port": 5555},
                    "noport": {"ip_address": "10.0.0.2", "port": "x"}
                },
                "garage": "nope"
            }"#,
        )
        .unwrap();

        let file = store.load_tv_endpoints().unwrap().unwrap();
        assert_eq!(file.entries.len(), 1);
        assert_eq!(file.entries[0].name, "tv");
        assert_eq!(file.entries[0].endpoint.port, DEFAULT_ADB_PORT);
        assert_eq!(file.skipped.len(), 3);
    }

    #[test]
    fn corrupt_snapshot_is_a_persistence_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        fs::write(store.devices_path(), "{not json").unwrap();
        assert!(matches!(
            store.load_snapshot(),
            Err(HubError::PersistenceFailure(_))
        ));
    }
}
