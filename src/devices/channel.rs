//! Remote command channel used by televisions
//!
//! A channel carries discrete remote-control signals to one television.
//! The concrete transport lives in `adapters::adb`; tests supply scripted
//! channels.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use super::television::TvEndpoint;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("television unreachable: {0}")]
    Unreachable(String),

    #[error("remote call timed out")]
    Timeout,

    #[error("command rejected: {0}")]
    Rejected(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Discrete remote-control keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteKey {
    VolumeUp,
    VolumeDown,
    Mute,
    WakeUp,
    Sleep,
    Home,
    Back,
    Up,
    Down,
    Left,
    Right,
    Enter,
    Menu,
    Play,
    Pause,
    PlayPause,
    Search,
}

impl RemoteKey {
    /// Android key event name for this key.
    pub fn keycode(self) -> &'static str {
        match self {
            RemoteKey::VolumeUp => "KEYCODE_VOLUME_UP",
            RemoteKey::VolumeDown => "KEYCODE_VOLUME_DOWN",
            RemoteKey::Mute => "KEYCODE_VOLUME_MUTE",
            RemoteKey::WakeUp => "KEYCODE_WAKEUP",
            RemoteKey::Sleep => "KEYCODE_SLEEP",
            RemoteKey::Home => "KEYCODE_HOME",
            RemoteKey::Back => "KEYCODE_BACK",
            RemoteKey::Up => "KEYCODE_DPAD_UP",
            RemoteKey::Down => "KEYCODE_DPAD_DOWN",
            RemoteKey::Left => "KEYCODE_DPAD_LEFT",
            RemoteKey::Right => "KEYCODE_DPAD_RIGHT",
            RemoteKey::Enter => "KEYCODE_ENTER",
            RemoteKey::Menu => "KEYCODE_MENU",
            RemoteKey::Play => "KEYCODE_MEDIA_PLAY",
            RemoteKey::Pause => "KEYCODE_MEDIA_PAUSE",
            RemoteKey::PlayPause => "KEYCODE_MEDIA_PLAY_PAUSE",
            RemoteKey::Search => "KEYCODE_SEARCH",
        }
    }

    /// Parse a user-facing key name (as accepted by `tv_press_key`).
    pub fn parse(name: &str) -> Option<Self> {
        let key = match name.trim().to_lowercase().as_str() {
            "enter" | "ok" | "select" => RemoteKey::Enter,
            "back" => RemoteKey::Back,
            "home" => RemoteKey::Home,
            "up" => RemoteKey::Up,
            "down" => RemoteKey::Down,
            "left" => RemoteKey::Left,
            "right" => RemoteKey::Right,
            "menu" => RemoteKey::Menu,
            "play" => RemoteKey::Play,
            "pause" => RemoteKey::Pause,
            "playpause" | "play_pause" => RemoteKey::PlayPause,
            "search" => RemoteKey::Search,
            "volume_up" | "volumeup" => RemoteKey::VolumeUp,
            "volume_down" | "volumedown" => RemoteKey::VolumeDown,
            "mute" => RemoteKey::Mute,
            _ => return None,
        };
        Some(key)
    }

    pub const PRESSABLE: &'static str =
        "enter, back, home, up, down, left, right, menu, play, pause, playpause, search, volume_up, volume_down, mute";
}

impl fmt::Display for RemoteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keycode())
    }
}

/// How an app is brought to the foreground.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launch {
    /// Fire the package's launcher intent.
    Launcher { package: &'static str },
    /// Start an explicit activity component.
    Activity { component: &'static str },
}

#[async_trait]
pub trait RemoteChannel: Send + Sync {
    async fn send_key(&self, key: RemoteKey) -> Result<(), ChannelError>;

    /// `text` is already sanitized (alphanumerics plus `%s` for spaces).
    async fn send_text(&self, text: &str) -> Result<(), ChannelError>;

    async fn launch(&self, launch: Launch) -> Result<(), ChannelError>;

    async fn is_alive(&self) -> bool;

    async fn package_installed(&self, package: &str) -> Result<bool, ChannelError>;
}

pub type SharedChannel = Arc<dyn RemoteChannel>;

/// Opens a channel for a television endpoint.
pub trait ChannelFactory: Send + Sync {
    fn open(&self, endpoint: &TvEndpoint) -> SharedChannel;
}
