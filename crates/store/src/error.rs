// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("input shape does not match value flags {0:?}")]
    FlagMismatch(crate::ValueFlags),
}
