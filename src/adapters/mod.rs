//! Transport adapters: ADB remote channel for televisions, MQTT notifications

pub mod adb;
pub mod mqtt;
