// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! External wire collaborators: the message buffer, the command header
//! codec, and the supervisor/worker fd-passing control channel.

mod buffer;
mod comms;
mod error;
mod header;

pub use buffer::{frame, Buffer, BufferMode, MSG_SIZE_PREFIX_LEN};
pub use comms::{create_pair, recv, send, InternalCommsCommand};
pub use error::WireError;
pub use header::{negotiate, Command, RawCommandHeader, Version, COMMAND_STATUS_FAILURE, HEADER_LEN, PROTOCOL};
