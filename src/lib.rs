//! Smart Home Hub
//!
//! Room-based control of household appliances for AI assistants.
//!
//! This library provides:
//! - A device model for lights, fans, AC units, chimneys and televisions
//! - A room-keyed registry with alias resolution and per-device locking
//! - A command router behind the MCP tool surface
//! - An ADB remote channel for Android TVs
//! - JSON state snapshots and MQTT notifications

pub mod adapters;
pub mod api;
pub mod bus;
pub mod config;
pub mod devices;
pub mod error;
pub mod mcp;
pub mod registry;
pub mod router;
pub mod store;
