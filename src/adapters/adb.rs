//! ADB remote channel
//!
//! Talks to the local ADB server (normally `127.0.0.1:5037`) using its
//! smart-socket protocol. Every request is a 4 hex digit length followed by
//! the payload; the server answers `OKAY` or `FAIL` plus a length-prefixed
//! message.
//!
//! Requests used:
//! - `host:connect:<ip>:<port>` attaches a network device
//! - `host-serial:<serial>:get-state` reports `device` when it is usable
//! - `host:transport:<serial>` then `shell:<cmd>` runs a command, output is
//!   read until the server closes the socket
//!
//! A shell request whose transport fails (device dropped off the server) is
//! retried once after reconnecting.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::devices::channel::{
    ChannelError, ChannelFactory, Launch, RemoteChannel, RemoteKey, SharedChannel,
};
use crate::devices::television::TvEndpoint;

pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";
pub const DEFAULT_SERVER_PORT: u16 = 5037;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const MAX_REPLY_LEN: usize = 64 * 1024;

/// Outcome of a single server request.
#[derive(Debug)]
enum Status {
    Okay,
    Fail(String),
}

async fn write_request<W: AsyncWrite + Unpin>(stream: &mut W, payload: &str) -> Result<(), ChannelError> {
    let frame = format!("{:04x}{}", payload.len(), payload);
    stream.write_all(frame.as_bytes()).await?;
    Ok(())
}

async fn read_length_prefixed<R: AsyncRead + Unpin>(stream: &mut R) -> Result<String, ChannelError> {
    let mut len = [0u8; 4];
    stream.read_exact(&mut len).await?;
    let len = std::str::from_utf8(&len)
        .ok()
        .and_then(|hex| usize::from_str_radix(hex, 16).ok())
        .filter(|len| *len <= MAX_REPLY_LEN)
        .ok_or_else(|| ChannelError::Rejected("malformed length from adb server".to_string()))?;

    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    Ok(String::from_utf8_lossy(&body).into_owned())
}

async fn read_status<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Status, ChannelError> {
    let mut status = [0u8; 4];
    stream.read_exact(&mut status).await?;
    match &status {
        b"OKAY" => Ok(Status::Okay),
        b"FAIL" => Ok(Status::Fail(read_length_prefixed(stream).await?)),
        other => Err(ChannelError::Rejected(format!(
            "unexpected adb status {:?}",
            String::from_utf8_lossy(other)
        ))),
    }
}

/// Send one request and require `OKAY`.
async fn expect_okay<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S, payload: &str) -> Result<(), ChannelError> {
    write_request(stream, payload).await?;
    match read_status(stream).await? {
        Status::Okay => Ok(()),
        Status::Fail(message) => Err(ChannelError::Rejected(message)),
    }
}

/// Shell output that signals failure even though the transport succeeded.
fn shell_failure(output: &str) -> Option<String> {
    let trimmed = output.trim();
    let failed = trimmed.starts_with("Error")
        || trimmed.contains("monkey aborted")
        || trimmed.contains("Exception");
    failed.then(|| trimmed.lines().next().unwrap_or(trimmed).to_string())
}

pub struct AdbChannel {
    server: String,
    serial: String,
}

impl AdbChannel {
    pub fn new(server_host: &str, server_port: u16, endpoint: &TvEndpoint) -> Self {
        Self {
            server: format!("{}:{}", server_host, server_port),
            serial: endpoint.to_string(),
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    async fn dial(&self) -> Result<TcpStream, ChannelError> {
        match timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.server)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(ChannelError::Unreachable(format!(
                "adb server {}: {}",
                self.server, e
            ))),
            Err(_) => Err(ChannelError::Timeout),
        }
    }

    /// `host:connect`, succeeding when the device is attached afterwards.
    async fn connect_device(&self) -> Result<(), ChannelError> {
        let mut stream = self.dial().await?;
        expect_okay(&mut stream, &format!("host:connect:{}", self.serial)).await?;
        let reply = read_length_prefixed(&mut stream).await?;
        tracing::debug!("adb connect {}: {}", self.serial, reply);

        if reply.contains("connected to") {
            Ok(())
        } else {
            Err(ChannelError::Unreachable(reply))
        }
    }

    async fn get_state(&self) -> Result<String, ChannelError> {
        let mut stream = self.dial().await?;
        expect_okay(&mut stream, &format!("host-serial:{}:get-state", self.serial)).await?;
        Ok(read_length_prefixed(&mut stream).await?.trim().to_string())
    }

    async fn shell_once(&self, command: &str) -> Result<String, ShellError> {
        let mut stream = self.dial().await.map_err(ShellError::Other)?;
        expect_okay(&mut stream, &format!("host:transport:{}", self.serial))
            .await
            .map_err(|e| match e {
                ChannelError::Rejected(message) => ShellError::Transport(message),
                other => ShellError::Other(other),
            })?;
        expect_okay(&mut stream, &format!("shell:{}", command))
            .await
            .map_err(ShellError::Other)?;

        let mut output = Vec::new();
        stream
            .read_to_end(&mut output)
            .await
            .map_err(|e| ShellError::Other(e.into()))?;
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    async fn shell(&self, command: &str) -> Result<String, ChannelError> {
        let output = match self.shell_once(command).await {
            Ok(output) => output,
            Err(ShellError::Transport(reason)) => {
                tracing::debug!("adb transport to {} failed ({}), reconnecting", self.serial, reason);
                self.connect_device().await?;
                self.shell_once(command).await.map_err(ShellError::into_channel)?
            }
            Err(ShellError::Other(e)) => return Err(e),
        };

        if let Some(reason) = shell_failure(&output) {
            return Err(ChannelError::Rejected(reason));
        }
        Ok(output)
    }
}

enum ShellError {
    /// The server could not route to the device.
    Transport(String),
    Other(ChannelError),
}

impl ShellError {
    fn into_channel(self) -> ChannelError {
        match self {
            ShellError::Transport(message) => ChannelError::Unreachable(message),
            ShellError::Other(e) => e,
        }
    }
}

#[async_trait]
impl RemoteChannel for AdbChannel {
    async fn send_key(&self, key: RemoteKey) -> Result<(), ChannelError> {
        self.shell(&format!("input keyevent {}", key.keycode())).await?;
        Ok(())
    }

    async fn send_text(&self, text: &str) -> Result<(), ChannelError> {
        self.shell(&format!("input text {}", text)).await?;
        Ok(())
    }

    async fn launch(&self, launch: Launch) -> Result<(), ChannelError> {
        let command = match launch {
            Launch::Launcher { package } => format!(
                "monkey -p {} -c android.intent.category.LAUNCHER 1",
                package
            ),
            Launch::Activity { component } => format!("am start -n {}", component),
        };
        self.shell(&command).await?;
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        if matches!(self.get_state().await.as_deref(), Ok("device")) {
            return true;
        }
        if let Err(e) = self.connect_device().await {
            tracing::debug!("adb connect {} failed: {}", self.serial, e);
            return false;
        }
        matches!(self.get_state().await.as_deref(), Ok("device"))
    }

    async fn package_installed(&self, package: &str) -> Result<bool, ChannelError> {
        let output = self.shell(&format!("pm list packages {}", package)).await?;
        let wanted = format!("package:{}", package);
        Ok(output.lines().any(|line| line.trim() == wanted))
    }
}

/// Opens ADB channels through one ADB server.
pub struct AdbChannelFactory {
    host: String,
    port: u16,
}

impl AdbChannelFactory {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Default for AdbChannelFactory {
    fn default() -> Self {
        Self::new(DEFAULT_SERVER_HOST, DEFAULT_SERVER_PORT)
    }
}

impl ChannelFactory for AdbChannelFactory {
    fn open(&self, endpoint: &TvEndpoint) -> SharedChannel {
        tracing::debug!("Opening adb channel to {} via {}:{}", endpoint, self.host, self.port);
        Arc::new(AdbChannel::new(&self.host, self.port, endpoint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn requests_are_hex_length_prefixed() {
        let mut out = Vec::new();
        write_request(&mut out, "host:connect:10.0.0.5:5555").await.unwrap();
        assert_eq!(out, b"001ahost:connect:10.0.0.5:5555");
    }

    #[tokio::test]
    async fn fail_status_carries_message() {
        let mut reply: &[u8] = b"FAIL000edevice offline";
        match read_status(&mut reply).await.unwrap() {
            Status::Fail(message) => assert_eq!(message, "device offline"),
            Status::Okay => panic!("expected FAIL"),
        }
    }

    #[tokio::test]
    async fn garbage_status_is_rejected() {
        let mut reply: &[u8] = b"WHAT";
        assert!(matches!(
            read_status(&mut reply).await,
            Err(ChannelError::Rejected(_))
        ));
    }

    #[test]
    fn shell_failures_are_detected() {
        assert!(shell_failure("").is_none());
        assert!(shell_failure("Starting: Intent { cmp=com.netflix.ninja/.MainActivity }").is_none());
        assert!(shell_failure("** No activities found to run, monkey aborted.").is_some());
        assert_eq!(
            shell_failure("Error: Activity class {x/y} does not exist.\nmore").as_deref(),
            Some("Error: Activity class {x/y} does not exist.")
        );
    }
}
