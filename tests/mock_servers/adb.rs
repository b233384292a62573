#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, dead_code)]
//! Mock ADB server for testing
//!
//! Speaks the smart-socket protocol the local ADB server exposes on port 5037:
//! hex length prefixed requests, `OKAY`/`FAIL` status words, and shell output
//! streamed until the socket closes.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Mock ADB server state
#[derive(Debug, Default)]
pub struct MockAdbState {
    /// Serials `host:connect` can attach
    pub reachable: HashSet<String>,
    /// Serials currently attached
    pub attached: HashSet<String>,
    /// Packages reported by `pm list packages`
    pub packages: Vec<String>,
    /// Canned output for shell commands starting with the key
    pub replies: HashMap<String, String>,
    /// Every request received, in order
    pub requests: Vec<String>,
}

/// Mock ADB server
pub struct MockAdbServer {
    addr: SocketAddr,
    state: Arc<RwLock<MockAdbState>>,
    handle: JoinHandle<()>,
}

impl MockAdbServer {
    /// Start a mock ADB server on a random port
    pub async fn start() -> Self {
        let state = Arc::new(RwLock::new(MockAdbState::default()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let state_clone = state.clone();
        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        let state = state_clone.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, state).await;
                        });
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Let `host:connect` attach this serial
    pub async fn make_reachable(&self, serial: &str) {
        self.state.write().await.reachable.insert(serial.to_string());
    }

    /// Attach a serial as if connected earlier
    pub async fn attach(&self, serial: &str) {
        let mut state = self.state.write().await;
        state.reachable.insert(serial.to_string());
        state.attached.insert(serial.to_string());
    }

    /// Take a serial off the network: detached and no longer connectable
    pub async fn detach(&self, serial: &str) {
        let mut state = self.state.write().await;
        state.attached.remove(serial);
        state.reachable.remove(serial);
    }

    pub async fn install(&self, package: &str) {
        self.state.write().await.packages.push(package.to_string());
    }

    /// Answer shell commands starting with `prefix` with `output`
    pub async fn reply(&self, prefix: &str, output: &str) {
        self.state
            .write()
            .await
            .replies
            .insert(prefix.to_string(), output.to_string());
    }

    pub async fn requests(&self) -> Vec<String> {
        self.state.read().await.requests.clone()
    }

    /// Shell commands received, without the `shell:` prefix
    pub async fn shell_commands(&self) -> Vec<String> {
        self.requests()
            .await
            .into_iter()
            .filter_map(|r| r.strip_prefix("shell:").map(str::to_string))
            .collect()
    }

    /// Stop the mock server
    pub async fn stop(self) {
        self.handle.abort();
    }
}

async fn read_request(stream: &mut TcpStream) -> Option<String> {
    let mut len = [0u8; 4];
    stream.read_exact(&mut len).await.ok()?;
    let len = usize::from_str_radix(std::str::from_utf8(&len).ok()?, 16).ok()?;
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await.ok()?;
    String::from_utf8(body).ok()
}

fn prefixed(message: &str) -> String {
    format!("{:04x}{}", message.len(), message)
}

fn okay(message: &str) -> String {
    format!("OKAY{}", prefixed(message))
}

fn fail(message: &str) -> String {
    format!("FAIL{}", prefixed(message))
}

/// Handle a single client connection: one host request, or a transport
/// switch followed by one shell command.
async fn handle_connection(mut stream: TcpStream, state: Arc<RwLock<MockAdbState>>) {
    let Some(request) = read_request(&mut stream).await else {
        return;
    };
    state.write().await.requests.push(request.clone());

    if let Some(serial) = request.strip_prefix("host:connect:") {
        let mut state = state.write().await;
        let reply = if state.reachable.contains(serial) {
            state.attached.insert(serial.to_string());
            okay(&format!("connected to {}", serial))
        } else {
            okay(&format!("failed to connect to {}", serial))
        };
        let _ = stream.write_all(reply.as_bytes()).await;
        return;
    }

    if let Some(rest) = request.strip_prefix("host-serial:") {
        let serial = rest.trim_end_matches(":get-state");
        let reply = if state.read().await.attached.contains(serial) {
            okay("device")
        } else {
            fail(&format!("device '{}' not found", serial))
        };
        let _ = stream.write_all(reply.as_bytes()).await;
        return;
    }

    if let Some(serial) = request.strip_prefix("host:transport:") {
        if !state.read().await.attached.contains(serial) {
            let reply = fail(&format!("device '{}' not found", serial));
            let _ = stream.write_all(reply.as_bytes()).await;
            return;
        }
        if stream.write_all(b"OKAY").await.is_err() {
            return;
        }

        let Some(shell) = read_request(&mut stream).await else {
            return;
        };
        state.write().await.requests.push(shell.clone());
        let Some(command) = shell.strip_prefix("shell:") else {
            let _ = stream.write_all(fail("unknown service").as_bytes()).await;
            return;
        };

        let output = shell_output(command, &*state.read().await);
        let _ = stream.write_all(b"OKAY").await;
        let _ = stream.write_all(output.as_bytes()).await;
        let _ = stream.shutdown().await;
        return;
    }

    let _ = stream.write_all(fail("unknown host service").as_bytes()).await;
}

fn shell_output(command: &str, state: &MockAdbState) -> String {
    if let Some((_, output)) = state
        .replies
        .iter()
        .find(|(prefix, _)| command.starts_with(prefix.as_str()))
    {
        return output.clone();
    }
    if command.starts_with("pm list packages") {
        return state
            .packages
            .iter()
            .map(|p| format!("package:{}\n", p))
            .collect();
    }
    if command.starts_with("monkey") {
        return "Events injected: 1\n".to_string();
    }
    String::new()
}
