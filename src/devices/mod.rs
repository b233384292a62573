//! Device model
//!
//! A device is a tagged variant: a [`DeviceKind`] plus a per-kind state
//! record. Which mutators a kind offers is fixed by
//! [`DeviceKind::capabilities`]; the router consults that table before
//! dispatching, so asking a light for `set_speed` is an error and never
//! touches state.

pub mod channel;
pub mod television;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{HubError, HubResult};
use channel::RemoteKey;
use television::{App, Direction, Television, TvState};

const MAX_BRIGHTNESS: u8 = 100;
const MAX_FAN_SPEED: u8 = 10;
const MIN_TEMPERATURE: i32 = 16;
const MAX_TEMPERATURE: i32 = 30;
const DEFAULT_TEMPERATURE: i32 = 24;

/// Power state. Always written as `"ON"`/`"OFF"`; lower case is accepted
/// when reading older files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Power {
    #[serde(rename = "ON", alias = "on")]
    On,
    #[default]
    #[serde(rename = "OFF", alias = "off")]
    Off,
}

impl fmt::Display for Power {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Power::On => f.write_str("ON"),
            Power::Off => f.write_str("OFF"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    #[serde(rename = "light")]
    Light,
    #[serde(rename = "fan")]
    Fan,
    #[serde(rename = "ac", alias = "climate-control")]
    Climate,
    #[serde(rename = "chimney", alias = "ventilation")]
    Ventilation,
    #[serde(rename = "tv", alias = "television")]
    Television,
}

impl DeviceKind {
    pub fn capabilities(self) -> &'static [Capability] {
        use Capability::*;
        match self {
            DeviceKind::Light => &[Power, SetBrightness],
            DeviceKind::Fan => &[Power, SetSpeed],
            DeviceKind::Climate => &[Power, SetTemperature],
            DeviceKind::Ventilation => &[Power, SetMode],
            DeviceKind::Television => &[
                Power,
                VolumeUp,
                VolumeDown,
                Mute,
                OpenApp,
                Navigate,
                SendText,
                PressKey,
                SearchAndPlay,
                SearchContent,
            ],
        }
    }

    pub fn supports(self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }
}

/// A named operation a device kind may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Power,
    SetBrightness,
    SetSpeed,
    SetTemperature,
    SetMode,
    VolumeUp,
    VolumeDown,
    Mute,
    OpenApp,
    Navigate,
    SendText,
    PressKey,
    SearchAndPlay,
    SearchContent,
}

impl Capability {
    /// Capability behind a `set_device_value` key.
    pub fn for_setting(key: &str) -> Option<Self> {
        match key.trim().to_lowercase().as_str() {
            "brightness" => Some(Capability::SetBrightness),
            "speed" => Some(Capability::SetSpeed),
            "temperature" => Some(Capability::SetTemperature),
            "mode" => Some(Capability::SetMode),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Capability::Power => "power",
            Capability::SetBrightness => "set_brightness",
            Capability::SetSpeed => "set_speed",
            Capability::SetTemperature => "set_temperature",
            Capability::SetMode => "set_mode",
            Capability::VolumeUp => "volume_up",
            Capability::VolumeDown => "volume_down",
            Capability::Mute => "mute",
            Capability::OpenApp => "open_app",
            Capability::Navigate => "navigate",
            Capability::SendText => "send_text",
            Capability::PressKey => "press_key",
            Capability::SearchAndPlay => "search_and_play",
            Capability::SearchContent => "search_content",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A fully parsed mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Power(Power),
    SetBrightness(u8),
    SetSpeed(u8),
    SetTemperature(i32),
    SetMode(String),
    VolumeUp,
    VolumeDown,
    Mute,
    OpenApp(App),
    Navigate { direction: Direction, steps: u8 },
    SendText(String),
    PressKey(RemoteKey),
    Search { query: String, app: App, autoplay: bool },
}

impl Command {
    /// Parse the value of a setting capability.
    pub fn setting(capability: Capability, value: &str) -> HubResult<Self> {
        let value = value.trim();
        match capability {
            Capability::SetBrightness => {
                parse_ranged(value, "brightness", 0, MAX_BRIGHTNESS).map(Command::SetBrightness)
            }
            Capability::SetSpeed => {
                parse_ranged(value, "speed", 0, MAX_FAN_SPEED).map(Command::SetSpeed)
            }
            Capability::SetTemperature => {
                parse_ranged(value, "temperature", MIN_TEMPERATURE, MAX_TEMPERATURE)
                    .map(Command::SetTemperature)
            }
            Capability::SetMode if !value.is_empty() => Ok(Command::SetMode(value.to_string())),
            Capability::SetMode => Err(HubError::invalid("mode must not be empty")),
            other => Err(HubError::invalid(format!("{} is not a setting", other))),
        }
    }

    pub fn capability(&self) -> Capability {
        match self {
            Command::Power(_) => Capability::Power,
            Command::SetBrightness(_) => Capability::SetBrightness,
            Command::SetSpeed(_) => Capability::SetSpeed,
            Command::SetTemperature(_) => Capability::SetTemperature,
            Command::SetMode(_) => Capability::SetMode,
            Command::VolumeUp => Capability::VolumeUp,
            Command::VolumeDown => Capability::VolumeDown,
            Command::Mute => Capability::Mute,
            Command::OpenApp(_) => Capability::OpenApp,
            Command::Navigate { .. } => Capability::Navigate,
            Command::SendText(_) => Capability::SendText,
            Command::PressKey(_) => Capability::PressKey,
            Command::Search { autoplay: true, .. } => Capability::SearchAndPlay,
            Command::Search { autoplay: false, .. } => Capability::SearchContent,
        }
    }

    /// Payload published on `home/{room}/{device}/set`, if this command
    /// is announced at all.
    pub fn notification(&self) -> Option<String> {
        match self {
            Command::Power(power) => Some(power.to_string()),
            Command::SetBrightness(v) => Some(format!("BRIGHTNESS:{}", v)),
            Command::SetSpeed(v) => Some(format!("SPEED:{}", v)),
            Command::SetTemperature(v) => Some(format!("TEMPERATURE:{}", v)),
            Command::SetMode(v) => Some(format!("MODE:{}", v)),
            _ => None,
        }
    }
}

fn parse_ranged<T>(value: &str, key: &str, min: T, max: T) -> HubResult<T>
where
    T: std::str::FromStr + PartialOrd + fmt::Display + Copy,
{
    value
        .parse::<T>()
        .ok()
        .filter(|v| *v >= min && *v <= max)
        .ok_or_else(|| {
            HubError::invalid(format!(
                "{} must be a whole number between {} and {}, got '{}'",
                key, min, max, value
            ))
        })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightState {
    pub power: Power,
    pub brightness: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanState {
    pub power: Power,
    pub speed: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClimateState {
    pub power: Power,
    pub temperature: i32,
}

impl Default for ClimateState {
    fn default() -> Self {
        Self {
            power: Power::Off,
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VentilationState {
    pub power: Power,
    pub mode: String,
}

impl Default for VentilationState {
    fn default() -> Self {
        Self {
            power: Power::Off,
            mode: "OFF".to_string(),
        }
    }
}

pub enum DeviceBody {
    Light(LightState),
    Fan(FanState),
    Climate(ClimateState),
    Ventilation(VentilationState),
    Television(Television),
}

/// Serializable description of a device, as written to `devices.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: DeviceKind,
    pub room: String,
    pub state: Map<String, Value>,
}

fn state_map<T: Serialize>(state: &T) -> Map<String, Value> {
    match serde_json::to_value(state) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

fn typed_state<T: serde::de::DeserializeOwned>(record: &DeviceRecord) -> HubResult<T> {
    serde_json::from_value(Value::Object(record.state.clone())).map_err(|e| {
        HubError::invalid(format!("bad state for {}/{}: {}", record.room, record.name, e))
    })
}

pub struct Device {
    name: String,
    room: String,
    body: DeviceBody,
}

impl Device {
    pub fn new(name: &str, room: &str, body: DeviceBody) -> Self {
        Self {
            name: name.to_string(),
            room: room.to_string(),
            body,
        }
    }

    pub fn light(name: &str, room: &str) -> Self {
        Self::new(name, room, DeviceBody::Light(LightState::default()))
    }

    pub fn fan(name: &str, room: &str) -> Self {
        Self::new(name, room, DeviceBody::Fan(FanState::default()))
    }

    pub fn climate(name: &str, room: &str) -> Self {
        Self::new(name, room, DeviceBody::Climate(ClimateState::default()))
    }

    pub fn ventilation(name: &str, room: &str) -> Self {
        Self::new(name, room, DeviceBody::Ventilation(VentilationState::default()))
    }

    pub fn television(name: &str, room: &str, tv: Television) -> Self {
        Self::new(name, room, DeviceBody::Television(tv))
    }

    /// Rebuild a non-television device from its record. Televisions need
    /// an endpoint and a channel and are rebuilt from the TV config instead.
    pub fn from_record(record: &DeviceRecord) -> HubResult<Self> {
        let body = match record.kind {
            DeviceKind::Light => DeviceBody::Light(typed_state(record)?),
            DeviceKind::Fan => DeviceBody::Fan(typed_state(record)?),
            DeviceKind::Climate => DeviceBody::Climate(typed_state(record)?),
            DeviceKind::Ventilation => DeviceBody::Ventilation(typed_state(record)?),
            DeviceKind::Television => {
                return Err(HubError::invalid(format!(
                    "television {} needs an endpoint to be rebuilt",
                    record.name
                )))
            }
        };
        Ok(Self::new(&record.name, &record.room, body))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub(crate) fn set_room(&mut self, room: String) {
        self.room = room;
    }

    pub fn kind(&self) -> DeviceKind {
        match &self.body {
            DeviceBody::Light(_) => DeviceKind::Light,
            DeviceBody::Fan(_) => DeviceKind::Fan,
            DeviceBody::Climate(_) => DeviceKind::Climate,
            DeviceBody::Ventilation(_) => DeviceKind::Ventilation,
            DeviceBody::Television(_) => DeviceKind::Television,
        }
    }

    pub fn power(&self) -> Power {
        match &self.body {
            DeviceBody::Light(s) => s.power,
            DeviceBody::Fan(s) => s.power,
            DeviceBody::Climate(s) => s.power,
            DeviceBody::Ventilation(s) => s.power,
            DeviceBody::Television(tv) => tv.state().power,
        }
    }

    pub fn as_television(&self) -> Option<&Television> {
        match &self.body {
            DeviceBody::Television(tv) => Some(tv),
            _ => None,
        }
    }

    pub fn as_television_mut(&mut self) -> Option<&mut Television> {
        match &mut self.body {
            DeviceBody::Television(tv) => Some(tv),
            _ => None,
        }
    }

    pub fn describe(&self) -> DeviceRecord {
        let state = match &self.body {
            DeviceBody::Light(s) => state_map(s),
            DeviceBody::Fan(s) => state_map(s),
            DeviceBody::Climate(s) => state_map(s),
            DeviceBody::Ventilation(s) => state_map(s),
            DeviceBody::Television(tv) => state_map(tv.state()),
        };
        DeviceRecord {
            name: self.name.clone(),
            kind: self.kind(),
            room: self.room.clone(),
            state,
        }
    }

    /// Overwrite state from a persisted record of the same kind.
    pub fn restore(&mut self, record: &DeviceRecord) -> HubResult<()> {
        if record.kind != self.kind() {
            return Err(HubError::invalid(format!(
                "persisted {}/{} is {:?}, live device is {:?}",
                record.room,
                record.name,
                record.kind,
                self.kind()
            )));
        }
        match &mut self.body {
            DeviceBody::Light(s) => *s = typed_state(record)?,
            DeviceBody::Fan(s) => *s = typed_state(record)?,
            DeviceBody::Climate(s) => *s = typed_state(record)?,
            DeviceBody::Ventilation(s) => *s = typed_state(record)?,
            DeviceBody::Television(tv) => tv.restore(&typed_state::<TvState>(record)?),
        }
        Ok(())
    }

    /// Apply a command. Simple devices always succeed; a television
    /// succeeds only if its remote channel does.
    pub async fn apply(&mut self, command: &Command) -> HubResult<()> {
        let name = self.name.clone();
        let unsupported = || HubError::unsupported(&name, command.capability());

        match (&mut self.body, command) {
            (DeviceBody::Television(tv), cmd) => apply_television(tv, cmd)
                .await
                .unwrap_or_else(|| Err(unsupported())),
            (DeviceBody::Light(s), Command::Power(p)) => {
                s.power = *p;
                Ok(())
            }
            (DeviceBody::Fan(s), Command::Power(p)) => {
                s.power = *p;
                Ok(())
            }
            (DeviceBody::Climate(s), Command::Power(p)) => {
                s.power = *p;
                Ok(())
            }
            (DeviceBody::Ventilation(s), Command::Power(p)) => {
                s.power = *p;
                Ok(())
            }
            (DeviceBody::Light(s), Command::SetBrightness(v)) => {
                s.brightness = *v;
                Ok(())
            }
            (DeviceBody::Fan(s), Command::SetSpeed(v)) => {
                s.speed = *v;
                Ok(())
            }
            (DeviceBody::Climate(s), Command::SetTemperature(v)) => {
                s.temperature = *v;
                Ok(())
            }
            (DeviceBody::Ventilation(s), Command::SetMode(v)) => {
                s.mode = v.clone();
                Ok(())
            }
            _ => Err(unsupported()),
        }
    }
}

/// `None` when the command is not a television command.
async fn apply_television(tv: &mut Television, command: &Command) -> Option<HubResult<()>> {
    let result = match command {
        Command::Power(p) => tv.set_power(*p).await,
        Command::VolumeUp => tv.volume_up().await,
        Command::VolumeDown => tv.volume_down().await,
        Command::Mute => tv.toggle_mute().await,
        Command::OpenApp(app) => tv.open_app(*app).await,
        Command::Navigate { direction, steps } => tv.navigate(*direction, *steps).await,
        Command::SendText(text) => tv.send_text(text).await,
        Command::PressKey(key) => tv.press_key(*key).await,
        Command::Search {
            query,
            app,
            autoplay,
        } => tv.search(query, *app, *autoplay).await,
        _ => return None,
    };
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn power_cycle_leaves_simple_devices_off() {
        for mut device in [
            Device::light("l", "kitchen"),
            Device::fan("f", "kitchen"),
            Device::climate("a", "kitchen"),
            Device::ventilation("c", "kitchen"),
        ] {
            device.apply(&Command::Power(Power::On)).await.unwrap();
            assert_eq!(device.power(), Power::On);
            device.apply(&Command::Power(Power::Off)).await.unwrap();
            assert_eq!(device.power(), Power::Off);
        }
    }

    #[tokio::test]
    async fn light_rejects_fan_speed_without_touching_state() {
        let mut light = Device::light("light1", "kitchen");
        light.apply(&Command::SetBrightness(75)).await.unwrap();
        let before = light.describe();

        let err = light.apply(&Command::SetSpeed(3)).await.unwrap_err();
        assert!(matches!(err, HubError::UnsupportedCapability { .. }));
        assert_eq!(light.describe(), before);
        assert_eq!(before.state["brightness"], 75);
    }

    #[test]
    fn capability_table_matches_kinds() {
        assert!(DeviceKind::Light.supports(Capability::SetBrightness));
        assert!(!DeviceKind::Light.supports(Capability::SetSpeed));
        assert!(DeviceKind::Television.supports(Capability::SearchAndPlay));
        assert!(!DeviceKind::Television.supports(Capability::SetMode));
        for kind in [
            DeviceKind::Light,
            DeviceKind::Fan,
            DeviceKind::Climate,
            DeviceKind::Ventilation,
            DeviceKind::Television,
        ] {
            assert!(kind.supports(Capability::Power));
        }
    }

    #[test]
    fn setting_values_are_range_checked() {
        assert_eq!(
            Command::setting(Capability::SetBrightness, "75").unwrap(),
            Command::SetBrightness(75)
        );
        assert!(Command::setting(Capability::SetBrightness, "101").is_err());
        assert!(Command::setting(Capability::SetBrightness, "bright").is_err());
        assert!(Command::setting(Capability::SetTemperature, "15").is_err());
        assert!(Command::setting(Capability::SetMode, "  ").is_err());
        assert_eq!(
            Command::setting(Capability::SetMode, " high ").unwrap(),
            Command::SetMode("high".to_string())
        );
    }

    #[test]
    fn notifications_use_upper_case_keys() {
        assert_eq!(Command::Power(Power::On).notification().as_deref(), Some("ON"));
        assert_eq!(
            Command::SetTemperature(22).notification().as_deref(),
            Some("TEMPERATURE:22")
        );
        assert_eq!(Command::VolumeUp.notification(), None);
    }

    #[test]
    fn record_round_trips_through_json() {
        let device = Device::climate("ac1", "bedroom");
        let json = serde_json::to_string(&device.describe()).unwrap();
        assert!(json.contains(r#""type":"ac""#));
        assert!(json.contains(r#""temperature":24"#));

        let record: DeviceRecord = serde_json::from_str(&json).unwrap();
        let rebuilt = Device::from_record(&record).unwrap();
        assert_eq!(rebuilt.describe(), device.describe());
    }

    #[test]
    fn lower_case_power_is_accepted_on_read() {
        let record: DeviceRecord = serde_json::from_str(
            r#"{"name":"fan1","type":"fan","room":"livingroom","state":{"power":"on","speed":2}}"#,
        )
        .unwrap();
        let device = Device::from_record(&record).unwrap();
        assert_eq!(device.power(), Power::On);
        assert_eq!(device.describe().state["power"], "ON");
    }
}
