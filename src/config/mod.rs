//! Configuration management
//!
//! Sources, lowest precedence first: built-in defaults, an optional
//! `config.{toml,json,yaml}` in the config directory, then `HUB_*`
//! environment variables (`HUB_MQTT__HOST`, `HUB_ADB__PORT`, ...).

use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;

const DEFAULT_PORT: u16 = 8002;
const DEFAULT_STATE_DIR: &str = "device_states";
const APP_DIR_NAME: &str = "smart-home-hub";

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Where `devices.json` and `tv_config.json` live.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default)]
    pub mqtt: Option<MqttConfig>,

    #[serde(default)]
    pub adb: AdbConfig,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_DIR)
}

#[derive(Debug, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_prefix: Option<String>,
}

fn default_mqtt_port() -> u16 {
    crate::adapters::mqtt::DEFAULT_PORT
}

/// Local ADB server the TV channel talks through.
#[derive(Debug, Deserialize)]
pub struct AdbConfig {
    #[serde(default = "default_adb_host")]
    pub host: String,
    #[serde(default = "default_adb_port")]
    pub port: u16,
}

impl Default for AdbConfig {
    fn default() -> Self {
        Self {
            host: default_adb_host(),
            port: default_adb_port(),
        }
    }
}

fn default_adb_host() -> String {
    crate::adapters::adb::DEFAULT_SERVER_HOST.to_string()
}

fn default_adb_port() -> u16 {
    crate::adapters::adb::DEFAULT_SERVER_PORT
}

/// Config directory (`HUB_CONFIG_DIR` or platform default)
pub fn get_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("HUB_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library/Application Support")
                .join(APP_DIR_NAME);
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg).join(APP_DIR_NAME);
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".config").join(APP_DIR_NAME);
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join(APP_DIR_NAME);
        }
    }

    PathBuf::from(".")
}

pub fn load_config() -> Result<Config> {
    let config_dir = get_config_dir();

    let mut builder = ::config::Config::builder()
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("state_dir", DEFAULT_STATE_DIR)?
        .add_source(
            ::config::File::with_name(&config_dir.join("config").to_string_lossy()).required(false),
        )
        .add_source(
            ::config::Environment::with_prefix("HUB")
                .separator("__")
                .try_parsing(true),
        );

    // HUB_PORT > PORT > config file > default
    if std::env::var("HUB_PORT").is_err() {
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(port_num) = port.parse::<u16>() {
                builder = builder.set_override("port", port_num as i64)?;
            }
        }
    }

    let config = builder.build()?;
    Ok(config.try_deserialize()?)
}
