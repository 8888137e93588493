// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::time::Duration;

/// `UBRIDGE_PROTOCOL`'s runtime version payload, from `Cargo.toml`.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The abstract-namespace socket the daemon listens on. Overridable for
/// tests that need one listener per test process.
pub fn socket_path() -> String {
    std::env::var("UBRIDGED_SOCKET_PATH").unwrap_or_else(|_| "sid-ubridge.socket".to_string())
}

/// `WORKER_IDLE_TIMEOUT_USEC` — how long an idle worker waits for a new
/// connection before exiting.
pub fn worker_idle_timeout() -> Duration {
    std::env::var("UBRIDGED_WORKER_IDLE_TIMEOUT_USEC")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_micros)
        .unwrap_or(Duration::from_micros(5_000_000))
}

/// Upper bound on a single command frame's payload size.
pub fn max_frame_size() -> usize {
    std::env::var("UBRIDGED_MAX_FRAME_SIZE")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1 << 20)
}
