//! Television device
//!
//! All state changes happen only after the remote channel confirms the
//! signal, so a television that is off or unreachable never drifts from
//! its recorded state.
//!
//! Multi-step flows (search, search-and-play) are driven by a per-app
//! [`AppProfile`]: ordered key presses with settle delays, plus a single
//! fallback sequence for summoning the search surface.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

use super::channel::{ChannelError, Launch, RemoteKey, SharedChannel};
use super::Power;
use crate::error::{HubError, HubResult};

pub const DEFAULT_ADB_PORT: u16 = 5555;
/// Upper bound for a single remote call.
pub const CHANNEL_TIMEOUT: Duration = Duration::from_secs(5);
/// Time an app needs after launch before it accepts input.
pub const APP_READY_DELAY: Duration = Duration::from_secs(4);
/// Pause between repeated navigation presses.
pub const NAV_REPEAT_DELAY: Duration = Duration::from_millis(500);
const TEXT_SETTLE: Duration = Duration::from_millis(1000);
const REACHABILITY_TIMEOUT: Duration = Duration::from_secs(3);
const MAX_NAV_STEPS: u8 = 10;
const DEFAULT_VOLUME: u8 = 50;
const MAX_VOLUME: u8 = 100;

/// Network endpoint of a television's remote channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TvEndpoint {
    pub ip_address: Ipv4Addr,
    pub port: u16,
}

impl TvEndpoint {
    /// Validate user input: dotted-quad IPv4 and a port in `1..=65535`.
    /// Octets may carry leading zeros (`192.168.01.10`).
    pub fn parse(ip_address: &str, port: i64) -> HubResult<Self> {
        let ip_address = parse_dotted_quad(ip_address.trim())
            .ok_or_else(|| HubError::invalid(format!("Invalid IP address format: {}", ip_address)))?;
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| {
                HubError::invalid(format!(
                    "Invalid port number: {}. Must be between 1-65535",
                    port
                ))
            })?;
        Ok(Self { ip_address, port })
    }

    /// Plain TCP reachability of the endpoint.
    pub async fn reachable(&self) -> bool {
        let addr = (self.ip_address, self.port);
        matches!(timeout(REACHABILITY_TIMEOUT, TcpStream::connect(addr)).await, Ok(Ok(_)))
    }
}

fn parse_dotted_quad(text: &str) -> Option<Ipv4Addr> {
    let mut octets = [0u8; 4];
    let mut parts = text.split('.');
    for octet in octets.iter_mut() {
        let part = parts.next()?;
        if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *octet = part.parse().ok()?;
    }
    match parts.next() {
        Some(_) => None,
        None => Some(Ipv4Addr::from(octets)),
    }
}

impl fmt::Display for TvEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip_address, self.port)
    }
}

/// Foreground app as far as the hub knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum App {
    Home,
    Netflix,
    Youtube,
    Unknown,
}

impl App {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "home" => Some(App::Home),
            "netflix" => Some(App::Netflix),
            "youtube" => Some(App::Youtube),
            _ => None,
        }
    }
}

impl fmt::Display for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            App::Home => "home",
            App::Netflix => "netflix",
            App::Youtube => "youtube",
            App::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Navigation directions accepted by `tv_navigate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    Select,
    Back,
    Home,
}

impl Direction {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "up" => Some(Direction::Up),
            "down" => Some(Direction::Down),
            "left" => Some(Direction::Left),
            "right" => Some(Direction::Right),
            "enter" | "select" | "ok" => Some(Direction::Select),
            "back" => Some(Direction::Back),
            "home" => Some(Direction::Home),
            _ => None,
        }
    }

    fn key(self) -> RemoteKey {
        match self {
            Direction::Up => RemoteKey::Up,
            Direction::Down => RemoteKey::Down,
            Direction::Left => RemoteKey::Left,
            Direction::Right => RemoteKey::Right,
            Direction::Select => RemoteKey::Enter,
            Direction::Back => RemoteKey::Back,
            Direction::Home => RemoteKey::Home,
        }
    }

    pub const ACCEPTED: &'static str = "up, down, left, right, enter, back, home";
}

/// One key press followed by a settle delay.
#[derive(Debug, Clone, Copy)]
pub struct NavStep {
    pub key: RemoteKey,
    pub settle: Duration,
}

const fn step(key: RemoteKey, settle_ms: u64) -> NavStep {
    NavStep {
        key,
        settle: Duration::from_millis(settle_ms),
    }
}

const CONFIRM: [NavStep; 1] = [step(RemoteKey::Enter, 2000)];

/// Declarative remote-control script for a streaming app.
#[derive(Debug)]
pub struct AppProfile {
    pub app: App,
    pub package: &'static str,
    pub activity: &'static str,
    /// Summons the search surface.
    pub search: &'static [NavStep],
    /// Used when `search` fails: directional walk ending in a confirm.
    pub search_fallback: &'static [NavStep],
    /// Picks the first result after the query is confirmed.
    pub select_first: &'static [NavStep],
}

pub static NETFLIX: AppProfile = AppProfile {
    app: App::Netflix,
    package: "com.netflix.ninja",
    activity: "com.netflix.ninja/.MainActivity",
    search: &[step(RemoteKey::Search, 1500)],
    search_fallback: &[
        step(RemoteKey::Left, 500),
        step(RemoteKey::Up, 500),
        step(RemoteKey::Up, 500),
        step(RemoteKey::Enter, 1500),
    ],
    select_first: &[step(RemoteKey::Right, 800), step(RemoteKey::Enter, 0)],
};

pub static YOUTUBE: AppProfile = AppProfile {
    app: App::Youtube,
    package: "com.google.android.youtube.tv",
    activity: "com.google.android.youtube.tv/com.google.android.apps.youtube.tv.activity.ShellActivity",
    search: &[step(RemoteKey::Search, 1500)],
    search_fallback: &[
        step(RemoteKey::Left, 500),
        step(RemoteKey::Up, 500),
        step(RemoteKey::Enter, 1500),
    ],
    select_first: &[step(RemoteKey::Down, 800), step(RemoteKey::Enter, 0)],
};

impl AppProfile {
    pub fn for_app(app: App) -> Option<&'static AppProfile> {
        match app {
            App::Netflix => Some(&NETFLIX),
            App::Youtube => Some(&YOUTUBE),
            App::Home | App::Unknown => None,
        }
    }

    pub fn all() -> [&'static AppProfile; 2] {
        [&NETFLIX, &YOUTUBE]
    }
}

/// Map text onto what the channel's text-entry primitive can carry:
/// spaces become `%s`, anything else that is not ASCII alphanumeric is dropped.
pub fn sanitize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c == ' ' {
            out.push_str("%s");
        } else if c.is_ascii_alphanumeric() {
            out.push(c);
        }
    }
    out
}

/// Persisted television state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TvState {
    pub power: Power,
    pub volume: u8,
    pub muted: bool,
    pub current_app: App,
}

impl Default for TvState {
    fn default() -> Self {
        Self {
            power: Power::Off,
            volume: DEFAULT_VOLUME,
            muted: false,
            current_app: App::Home,
        }
    }
}

/// Run a channel call under [`CHANNEL_TIMEOUT`].
async fn guarded<T>(call: impl Future<Output = Result<T, ChannelError>>) -> HubResult<T> {
    match timeout(CHANNEL_TIMEOUT, call).await {
        Ok(result) => result.map_err(HubError::from),
        Err(_) => Err(ChannelError::Timeout.into()),
    }
}

pub struct Television {
    endpoint: TvEndpoint,
    channel: SharedChannel,
    state: TvState,
}

impl Television {
    pub fn new(endpoint: TvEndpoint, channel: SharedChannel) -> Self {
        Self {
            endpoint,
            channel,
            state: TvState::default(),
        }
    }

    pub fn endpoint(&self) -> TvEndpoint {
        self.endpoint
    }

    pub fn state(&self) -> &TvState {
        &self.state
    }

    pub fn channel(&self) -> SharedChannel {
        self.channel.clone()
    }

    /// Point the television at a new endpoint with a freshly opened channel.
    pub fn reconfigure(&mut self, endpoint: TvEndpoint, channel: SharedChannel) {
        self.endpoint = endpoint;
        self.channel = channel;
    }

    /// Take over a persisted state record. Volume is clamped to the
    /// television's range.
    pub fn restore(&mut self, persisted: &TvState) {
        self.state = TvState {
            volume: persisted.volume.min(MAX_VOLUME),
            ..persisted.clone()
        };
    }

    pub async fn is_connected(&self) -> bool {
        timeout(CHANNEL_TIMEOUT, self.channel.is_alive())
            .await
            .unwrap_or(false)
    }

    pub async fn set_power(&mut self, power: Power) -> HubResult<()> {
        let key = match power {
            Power::On => RemoteKey::WakeUp,
            Power::Off => RemoteKey::Sleep,
        };
        guarded(self.channel.send_key(key)).await?;
        self.state.power = power;
        Ok(())
    }

    pub async fn volume_up(&mut self) -> HubResult<()> {
        guarded(self.channel.send_key(RemoteKey::VolumeUp)).await?;
        self.state.volume = (self.state.volume + 1).min(MAX_VOLUME);
        Ok(())
    }

    pub async fn volume_down(&mut self) -> HubResult<()> {
        guarded(self.channel.send_key(RemoteKey::VolumeDown)).await?;
        self.state.volume = self.state.volume.saturating_sub(1);
        Ok(())
    }

    pub async fn toggle_mute(&mut self) -> HubResult<()> {
        guarded(self.channel.send_key(RemoteKey::Mute)).await?;
        self.state.muted = !self.state.muted;
        Ok(())
    }

    pub async fn open_app(&mut self, app: App) -> HubResult<()> {
        match AppProfile::for_app(app) {
            Some(profile) => self.launch(profile).await,
            None if app == App::Home => self.go_home().await,
            None => Err(HubError::invalid(format!(
                "App '{}' not supported. Available: netflix, youtube, home",
                app
            ))),
        }
    }

    pub async fn navigate(&mut self, direction: Direction, steps: u8) -> HubResult<()> {
        if steps == 0 || steps > MAX_NAV_STEPS {
            return Err(HubError::invalid(format!(
                "steps must be between 1 and {}",
                MAX_NAV_STEPS
            )));
        }
        for i in 0..steps {
            if i > 0 {
                sleep(NAV_REPEAT_DELAY).await;
            }
            if direction == Direction::Home {
                self.go_home().await?;
            } else {
                guarded(self.channel.send_key(direction.key())).await?;
            }
        }
        Ok(())
    }

    pub async fn send_text(&mut self, text: &str) -> HubResult<()> {
        let sanitized = sanitize_text(text);
        if sanitized.is_empty() {
            return Err(HubError::invalid(
                "text contains no characters the television can receive",
            ));
        }
        guarded(self.channel.send_text(&sanitized)).await
    }

    /// Keys that change recorded state go through the matching operation.
    pub async fn press_key(&mut self, key: RemoteKey) -> HubResult<()> {
        match key {
            RemoteKey::Home => self.go_home().await,
            RemoteKey::VolumeUp => self.volume_up().await,
            RemoteKey::VolumeDown => self.volume_down().await,
            RemoteKey::Mute => self.toggle_mute().await,
            other => guarded(self.channel.send_key(other)).await,
        }
    }

    /// Bring `app` to the front, search for `query` and, with `autoplay`,
    /// select the first result. The app is launched even when it is already
    /// recorded as foreground. Stops at the first failed step; whatever was
    /// achieved before it stays recorded.
    pub async fn search(&mut self, query: &str, app: App, autoplay: bool) -> HubResult<()> {
        let profile = AppProfile::for_app(app).ok_or_else(|| {
            HubError::invalid(format!("Search is not available for '{}'", app))
        })?;
        let text = sanitize_text(query);
        if text.is_empty() {
            return Err(HubError::invalid("search query is empty after sanitizing"));
        }

        self.launch(profile).await?;
        sleep(APP_READY_DELAY).await;

        if let Err(e) = self.run_steps(profile.search).await {
            tracing::debug!("{} search key failed ({}), trying navigation", app, e);
            self.run_steps(profile.search_fallback).await?;
        }

        guarded(self.channel.send_text(&text)).await?;
        sleep(TEXT_SETTLE).await;
        self.run_steps(&CONFIRM).await?;

        if autoplay {
            self.run_steps(profile.select_first).await?;
        }
        Ok(())
    }

    async fn go_home(&mut self) -> HubResult<()> {
        guarded(self.channel.send_key(RemoteKey::Home)).await?;
        self.state.current_app = App::Home;
        Ok(())
    }

    /// Launcher intent first, explicit activity as the one fallback.
    async fn launch(&mut self, profile: &AppProfile) -> HubResult<()> {
        let primary = Launch::Launcher {
            package: profile.package,
        };
        if let Err(e) = guarded(self.channel.launch(primary)).await {
            tracing::debug!("Launcher start of {} failed: {}", profile.package, e);
            let fallback = Launch::Activity {
                component: profile.activity,
            };
            guarded(self.channel.launch(fallback)).await?;
        }
        self.state.current_app = profile.app;
        Ok(())
    }

    async fn run_steps(&self, steps: &[NavStep]) -> HubResult<()> {
        for step in steps {
            guarded(self.channel.send_key(step.key)).await?;
            if !step.settle.is_zero() {
                sleep(step.settle).await;
            }
        }
        Ok(())
    }
}
