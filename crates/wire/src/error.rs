// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("frame exceeds configured limit ({0} > {1} bytes)")]
    FrameTooLarge(usize, usize),

    #[error("header buffer is truncated: need {0} bytes, have {1}")]
    ShortHeader(usize, usize),

    #[error("peer closed the connection")]
    PeerClosed,

    #[error("ancillary fd-passing message carried no file descriptor")]
    NoFdReceived,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Nix(#[from] nix::Error),
}
