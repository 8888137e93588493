// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Tree(#[from] ub_core::TreeError),

    #[error(transparent)]
    Reactor(#[from] ub_core::ReactorError),

    #[error(transparent)]
    Wire(#[from] ub_wire::WireError),

    #[error(transparent)]
    Ident(#[from] ub_ident::IdentError),

    #[error(transparent)]
    Store(#[from] ub_store::StoreError),

    #[error("fork(2) failed: {0}")]
    Fork(#[source] nix::Error),

    #[error("could not bind the listening socket at {0:?}: {1}")]
    Bind(String, #[source] nix::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Nix(#[from] nix::Error),
}
