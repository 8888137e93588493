// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C6 — the command pipeline. A `Command` node is constructed with the raw
//! frame as its kickstart and dispatches itself from a deferred event
//! source on the next loop turn, so the node is addressable in the tree for
//! the whole of its one dispatch.

use ub_core::{command_node_id, NodeFlags, NodeHandle, NodeKind, ResourceTree, ResourceType};
use ub_ident::{Device, IdentPhase};
use ub_store::{Input, ValueFlags};
use ub_wire::{Command as CommandTag, RawCommandHeader, COMMAND_STATUS_FAILURE, PROTOCOL};

use crate::env;
use crate::error::DaemonError;
use crate::worker::{self, Worker};

pub struct Command {
    header: RawCommandHeader,
    worker: NodeHandle,
}

impl NodeKind for Command {
    const TYPE: ResourceType = ResourceType { name: "command", owns_event_loop: false, owns_watchdog: false };
}

fn command_name(tag: CommandTag) -> &'static str {
    match tag {
        CommandTag::Unknown => "unknown",
        CommandTag::Reply => "reply",
        CommandTag::Version => "version",
        CommandTag::Identify => "identify",
        CommandTag::Checkpoint => "checkpoint",
    }
}

/// Parses `frame`'s header and creates a `command` child of `worker_handle`,
/// deferring its actual dispatch to the loop's next turn.
pub fn spawn(tree: &mut ResourceTree, worker_handle: NodeHandle, frame: Vec<u8>) -> Result<(), DaemonError> {
    let header = RawCommandHeader::from_bytes(&frame)?;
    let pid = nix::unistd::getpid();
    let id = command_node_id(pid, command_name(header.command()));

    let handle = tree.create(
        Some(worker_handle),
        id,
        NodeFlags::empty(),
        Command { header, worker: worker_handle },
    )?;
    tree.register_deferred(handle, on_dispatch)?;
    Ok(())
}

fn on_dispatch(tree: &mut ResourceTree, handle: NodeHandle, _detail: ub_core::EventDetail) {
    if let Err(e) = dispatch(tree, handle) {
        tracing::warn!(error = %e, "command dispatch failed");
    }
    let worker_handle = tree.get_data::<Command>(handle).map(|c| c.worker).ok();
    if let Some(worker_handle) = worker_handle {
        if let Err(e) = worker::cleanup(tree, worker_handle) {
            tracing::warn!(error = %e, "worker cleanup after command dispatch failed");
        }
    }
}

/// Negotiates the protocol, runs the tag's handler, and writes the reply
/// frame to the worker's connection.
fn dispatch(tree: &mut ResourceTree, handle: NodeHandle) -> Result<(), DaemonError> {
    let (incoming, tag, worker_handle) = {
        let cmd = tree.get_data::<Command>(handle)?;
        (cmd.header.clone(), cmd.header.command(), cmd.worker)
    };

    let mut status: u64 = 0;
    let mut data = Vec::new();
    let reply_protocol = ub_wire::negotiate(PROTOCOL, incoming.protocol);
    if incoming.protocol <= PROTOCOL {
        match run_handler(tree, worker_handle, tag, &incoming.data) {
            Ok(out) => data = out,
            Err(e) => {
                tracing::debug!(error = %e, tag = ?tag, "command handler failed");
                status |= COMMAND_STATUS_FAILURE;
            }
        }
    } else {
        status |= COMMAND_STATUS_FAILURE;
    }

    let reply = RawCommandHeader::new(reply_protocol, CommandTag::Reply, status, data);
    worker::write_reply(tree, worker_handle, &reply.to_bytes())
}

fn run_handler(
    tree: &mut ResourceTree,
    worker_handle: NodeHandle,
    tag: CommandTag,
    payload: &[u8],
) -> Result<Vec<u8>, DaemonError> {
    match tag {
        CommandTag::Unknown | CommandTag::Reply | CommandTag::Checkpoint => Ok(Vec::new()),
        CommandTag::Version => {
            let version = ub_wire::Version::parse(env::PROTOCOL_VERSION);
            Ok(version.to_bytes().to_vec())
        }
        CommandTag::Identify => {
            let device = ub_ident::parse(payload)?;
            run_ident_phases(tree, worker_handle, &device)?;
            Ok(Vec::new())
        }
    }
}

/// Walks `ident` through `scan-post`, the only prefix the dispatch body
/// ever reaches. Only the `Ident` phase itself has concrete work to do —
/// committing the parsed device's properties to the worker's key-value
/// store; the remaining scan phases are invoked but otherwise pass
/// through, as no further scan-core/scan-post logic survives in the
/// sources this was ported from.
fn run_ident_phases(tree: &mut ResourceTree, worker_handle: NodeHandle, device: &Device) -> Result<(), DaemonError> {
    let mut phase = Some(IdentPhase::START);
    while let Some(current) = phase {
        if current == IdentPhase::Ident {
            commit_device(tree, worker_handle, device)?;
        }
        phase = current.next();
    }
    Ok(())
}

fn commit_device(tree: &mut ResourceTree, worker_handle: NodeHandle, device: &Device) -> Result<(), DaemonError> {
    let prefix = device.kv_key_prefix().ok_or(ub_ident::IdentError::NoKeyableIdentity)?;
    let kv = &mut tree.get_data_mut::<Worker>(worker_handle)?.kv;
    for (key, value) in &device.properties {
        kv.set_value(&prefix, key, Input::Bytes(value.as_bytes()), ValueFlags::empty(), None)?;
    }
    Ok(())
}

#[path = "command_tests.rs"]
#[cfg(test)]
mod tests;
