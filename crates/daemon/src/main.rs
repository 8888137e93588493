// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use tracing_subscriber::EnvFilter;
use ub_core::ResourceTree;
use ub_daemon::{env, error::DaemonError, supervisor};

fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    match run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!(error = %e, "ubridged exited with an error");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32, DaemonError> {
    let mut tree = ResourceTree::new();
    let listener = supervisor::create_listener(&mut tree, &env::socket_path())?;
    supervisor::run(&mut tree, listener)
}
