//! Mock servers for adapter integration testing
//!
//! These stand in for the services the hub talks to, so adapters can be
//! exercised over real sockets without hardware.

pub mod adb;

pub use adb::MockAdbServer;
