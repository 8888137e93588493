// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentError {
    #[error("uevent payload is missing an ACTION property")]
    MissingAction,

    #[error("uevent payload contains invalid UTF-8 in a KEY=VALUE entry")]
    InvalidEncoding,

    #[error("uevent payload has neither a DEVNAME nor a MAJOR/MINOR pair to key on")]
    NoKeyableIdentity,
}
