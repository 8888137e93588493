// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Node identity and type descriptors for the resource tree.

use std::fmt;

use bitflags::bitflags;
use smol_str::SmolStr;

/// Opaque reference to a node in a [`crate::tree::ResourceTree`].
///
/// Carries a generation counter so a handle from a destroyed node can never
/// alias a later node reusing the same slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeHandle({}#{})", self.index, self.generation)
    }
}

bitflags! {
    /// Mirrors `sid_resource_flags_t` from the original C resource tree.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct NodeFlags: u32 {
        /// A walk that reaches this node may see it but may not climb past
        /// it to its parent. Enforced by `ResourceTree`'s ancestry queries
        /// (`is_ancestor_of_type`, `get_top_level`, `get_full_id`).
        const RESTRICT_WALK_UP   = 0x0000_0001;
        /// A walk that reaches this node may see it but may not descend
        /// into its children. No recursive descendant walk is exposed
        /// beyond direct `children`/`children_of_type`, so this currently
        /// has no enforcement point; kept for parity with the original
        /// resource-flag set.
        const RESTRICT_WALK_DOWN = 0x0000_0002;
        const RESTRICT_WALK_MASK = Self::RESTRICT_WALK_UP.bits() | Self::RESTRICT_WALK_DOWN.bits();
        const DISALLOW_ISOLATION = 0x0000_0004;
    }
}

/// Static descriptor for a kind of node, analogous to `sid_resource_type_t`.
///
/// Implemented on the per-kind data type (see [`crate::tree::NodeKind`])
/// rather than carried as a registered table of function pointers: the
/// tree's `create`/`get_data` operations are generic over the kind, so the
/// compiler — not a void-pointer cast at the call site — enforces that a
/// handle's data is read back as the type it was created with.
pub struct ResourceType {
    pub name: &'static str,
    pub owns_event_loop: bool,
    pub owns_watchdog: bool,
}

/// A node's identifier, unique among its siblings.
pub type NodeId = SmolStr;

/// Builds the `"<pid>/<command-name>"` id scheme used for per-command nodes.
pub fn command_node_id(pid: nix::unistd::Pid, command_name: &str) -> NodeId {
    SmolStr::new(format!("{}/{}", pid, command_name))
}
