//! Stamps the hub binary with its release version and commit.
//!
//! `HUB_VERSION` defaults to the crate version. `HUB_GIT_SHA` is taken from
//! the environment, then from a CI checkout (`GITHUB_SHA`), then from the
//! local repository. Empty variables count as unset.

use std::path::Path;
use std::process::Command;

const SHORT_SHA: usize = 7;

fn main() {
    for var in ["HUB_VERSION", "HUB_GIT_SHA", "GITHUB_SHA"] {
        println!("cargo:rerun-if-env-changed={}", var);
    }
    if Path::new(".git/HEAD").exists() {
        println!("cargo:rerun-if-changed=.git/HEAD");
    }

    println!("cargo:rustc-env=HUB_VERSION={}", version());
    println!("cargo:rustc-env=HUB_GIT_SHA={}", commit());
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn version() -> String {
    env_value("HUB_VERSION")
        .or_else(|| env_value("CARGO_PKG_VERSION"))
        .unwrap_or_else(|| "unknown".into())
}

fn commit() -> String {
    env_value("HUB_GIT_SHA")
        .or_else(|| env_value("GITHUB_SHA").map(|sha| sha.chars().take(SHORT_SHA).collect()))
        .or_else(repository_head)
        .unwrap_or_else(|| "unknown".into())
}

fn repository_head() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())?;
    String::from_utf8(output.stdout)
        .ok()
        .map(|sha| sha.trim().to_string())
        .filter(|sha| !sha.is_empty())
}
