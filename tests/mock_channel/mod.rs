#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, dead_code)]
//! Scripted remote channel for router and television tests
//!
//! Records every call and fails on demand. The factory hands out one channel
//! per endpoint so a test can reach the channel behind a TV it added through
//! the router.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use smart_home_hub::devices::channel::{
    ChannelError, ChannelFactory, Launch, RemoteChannel, RemoteKey, SharedChannel,
};
use smart_home_hub::devices::television::TvEndpoint;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Key(RemoteKey),
    Text(String),
    Launch(Launch),
}

#[derive(Default)]
pub struct MockChannel {
    calls: Mutex<Vec<Call>>,
    offline: AtomicBool,
    failing_keys: Mutex<Vec<RemoteKey>>,
    fail_launcher: AtomicBool,
    fail_activity: AtomicBool,
    installed: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
}

impl MockChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every call fails and liveness is false.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn fail_key(&self, key: RemoteKey) {
        self.failing_keys.lock().unwrap().push(key);
    }

    pub fn fail_launches(&self, launcher: bool, activity: bool) {
        self.fail_launcher.store(launcher, Ordering::SeqCst);
        self.fail_activity.store(activity, Ordering::SeqCst);
    }

    pub fn install(&self, package: &str) {
        self.installed.lock().unwrap().push(package.to_string());
    }

    /// Every call sleeps this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn keys(&self) -> Vec<RemoteKey> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Key(key) => Some(key),
                _ => None,
            })
            .collect()
    }

    async fn answer(&self, call: Call, fails: bool) -> Result<(), ChannelError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().unwrap().push(call);
        if self.offline.load(Ordering::SeqCst) {
            return Err(ChannelError::Unreachable("mock offline".to_string()));
        }
        if fails {
            return Err(ChannelError::Rejected("mock failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteChannel for MockChannel {
    async fn send_key(&self, key: RemoteKey) -> Result<(), ChannelError> {
        let fails = self.failing_keys.lock().unwrap().contains(&key);
        self.answer(Call::Key(key), fails).await
    }

    async fn send_text(&self, text: &str) -> Result<(), ChannelError> {
        self.answer(Call::Text(text.to_string()), false).await
    }

    async fn launch(&self, launch: Launch) -> Result<(), ChannelError> {
        let fails = match launch {
            Launch::Launcher { .. } => self.fail_launcher.load(Ordering::SeqCst),
            Launch::Activity { .. } => self.fail_activity.load(Ordering::SeqCst),
        };
        self.answer(Call::Launch(launch), fails).await
    }

    async fn is_alive(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }

    async fn package_installed(&self, package: &str) -> Result<bool, ChannelError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ChannelError::Unreachable("mock offline".to_string()));
        }
        Ok(self.installed.lock().unwrap().iter().any(|p| p == package))
    }
}

/// Hands out one [`MockChannel`] per endpoint.
#[derive(Default)]
pub struct MockChannelFactory {
    channels: Mutex<HashMap<String, Arc<MockChannel>>>,
}

impl MockChannelFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn channel(&self, endpoint: &str) -> Arc<MockChannel> {
        self.channels
            .lock()
            .unwrap()
            .entry(endpoint.to_string())
            .or_insert_with(MockChannel::new)
            .clone()
    }
}

impl ChannelFactory for MockChannelFactory {
    fn open(&self, endpoint: &TvEndpoint) -> SharedChannel {
        self.channel(&endpoint.to_string())
    }
}
