// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! The reactor and resource tree shared by every node in the daemon.

pub mod error;
pub mod id;
pub mod reactor;
pub mod tree;

pub use error::{ReactorError, TreeError};
pub use id::{command_node_id, NodeFlags, NodeHandle, NodeId, ResourceType};
pub use reactor::{EventDetail, Reactor, SourceKey};
pub use tree::{ChildIter, NodeKind, ResourceTree};
