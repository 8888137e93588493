// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C5 — the worker runtime: the per-child-process event loop that accepts
//! exactly one client connection at a time, dispatches its command, and
//! exits on `SIGTERM` — sent by the supervisor's observer once this
//! worker has sat idle past its timeout.

use std::os::fd::{AsRawFd, OwnedFd};

use nix::sys::epoll::EpollFlags;
use nix::sys::signal::Signal;
use ub_core::{NodeFlags, NodeHandle, NodeKind, ResourceTree, ResourceType, SourceKey};
use ub_store::KvStore;
use ub_wire::{Buffer, BufferMode, InternalCommsCommand};

use crate::command::{self, Command};
use crate::env;
use crate::error::DaemonError;

pub struct Worker {
    pub comms: OwnedFd,
    pub conn: Option<OwnedFd>,
    pub conn_source: Option<SourceKey>,
    pub read_buf: Buffer,
    pub kv: KvStore,
}

impl NodeKind for Worker {
    const TYPE: ResourceType = ResourceType { name: "worker", owns_event_loop: true, owns_watchdog: false };
}

/// Entry point run in the freshly forked child. Builds a brand-new
/// resource tree — nothing is inherited from the supervisor's.
pub fn run(comms: OwnedFd) -> Result<(), DaemonError> {
    let mut tree = ResourceTree::new();
    let pid = nix::unistd::getpid();

    let handle = tree.create(
        None,
        format!("worker-{pid}"),
        NodeFlags::empty(),
        Worker {
            comms,
            conn: None,
            conn_source: None,
            read_buf: Buffer::new(BufferMode::SizePrefix, Some(env::max_frame_size())),
            kv: KvStore::new(),
        },
    )?;

    let comms_fd = tree.get_data::<Worker>(handle)?.comms.as_raw_fd();
    tree.register_io(handle, comms_fd, EpollFlags::EPOLLIN, on_worker_comms_event)?;
    tree.register_signal(handle, Signal::SIGTERM, on_signal_event)?;

    let code = tree.run_event_loop(handle)?;
    tracing::debug!(?pid, code, "worker event loop exited");
    Ok(())
}

fn on_signal_event(tree: &mut ResourceTree, handle: NodeHandle, _detail: ub_core::EventDetail) {
    tracing::debug!("worker received SIGTERM, exiting event loop");
    let _ = tree.exit_event_loop(handle, 0);
}

/// `_on_worker_comms_event`: receives `RUNNING` (with the accepted client
/// fd) or tolerates a spurious wakeup. The supervisor's observer owns the
/// idle timeout that eventually `SIGTERM`s this worker; nothing here
/// arms or cancels a timer.
fn on_worker_comms_event(tree: &mut ResourceTree, handle: NodeHandle, _detail: ub_core::EventDetail) {
    let comms_fd = match tree.get_data::<Worker>(handle) {
        Ok(w) => w.comms.as_raw_fd(),
        Err(_) => return,
    };
    match ub_wire::recv(comms_fd) {
        Ok((InternalCommsCommand::Running, Some(fd))) => {
            if let Err(e) = accept_connection(tree, handle, fd) {
                tracing::warn!(error = %e, "worker failed to accept passed connection");
            }
        }
        Ok((InternalCommsCommand::Running, None)) => {
            tracing::warn!("RUNNING comms message carried no file descriptor");
        }
        Ok((InternalCommsCommand::Idle, _)) => {}
        Err(ub_wire::WireError::Nix(nix::errno::Errno::EAGAIN | nix::errno::Errno::EINTR)) => {}
        Err(e) => {
            tracing::debug!(error = %e, "supervisor comms channel closed, exiting");
            let _ = tree.exit_event_loop(handle, 0);
        }
    }
}

fn accept_connection(tree: &mut ResourceTree, handle: NodeHandle, fd: OwnedFd) -> Result<(), DaemonError> {
    let raw = fd.as_raw_fd();
    tree.get_data_mut::<Worker>(handle)?.conn = Some(fd);
    let key = tree.register_io(handle, raw, EpollFlags::EPOLLIN, on_conn_event)?;
    tree.get_data_mut::<Worker>(handle)?.conn_source = Some(key);
    Ok(())
}

fn on_conn_event(tree: &mut ResourceTree, handle: NodeHandle, _detail: ub_core::EventDetail) {
    if let Err(e) = read_and_dispatch(tree, handle) {
        tracing::debug!(error = %e, "connection read failed, cleaning up worker");
        let _ = cleanup(tree, handle);
    }
}

fn read_and_dispatch(tree: &mut ResourceTree, handle: NodeHandle) -> Result<(), DaemonError> {
    let conn_fd = tree
        .get_data::<Worker>(handle)?
        .conn
        .as_ref()
        .map(AsRawFd::as_raw_fd)
        .ok_or(ub_wire::WireError::PeerClosed)?;

    let mut scratch = [0u8; 4096];
    let n = match nix::unistd::read(conn_fd, &mut scratch) {
        Ok(n) => n,
        Err(nix::errno::Errno::EAGAIN | nix::errno::Errno::EINTR) => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if n == 0 {
        return Err(ub_wire::WireError::PeerClosed.into());
    }
    tree.get_data_mut::<Worker>(handle)?.read_buf.append(&scratch[..n])?;

    let Some(frame) = tree.get_data_mut::<Worker>(handle)?.read_buf.take_frame()? else {
        return Ok(());
    };

    command::spawn(tree, handle, frame)?;
    Ok(())
}

/// `_worker_cleanup`: destroy every `command` child, destroy the
/// connection's io source, reset the read buffer, then tell the
/// supervisor we're idle again. Order matters: destroying the command
/// children before the connection source mirrors the original and keeps
/// a command's reply write from racing the fd's teardown.
pub fn cleanup(tree: &mut ResourceTree, handle: NodeHandle) -> Result<(), DaemonError> {
    for child in tree.children_of_type::<Command>(handle)? {
        tree.destroy(child)?;
    }

    if let Some(key) = tree.get_data_mut::<Worker>(handle)?.conn_source.take() {
        tree.destroy_source(handle, key)?;
    }
    tree.get_data_mut::<Worker>(handle)?.conn = None;
    tree.get_data_mut::<Worker>(handle)?.read_buf.reset();

    let comms_fd = tree.get_data::<Worker>(handle)?.comms.as_raw_fd();
    ub_wire::send(comms_fd, InternalCommsCommand::Idle, None)?;
    Ok(())
}

/// Writes `header_bytes` to the worker's connection, wrapped in its
/// length prefix.
pub fn write_reply(tree: &mut ResourceTree, handle: NodeHandle, header_bytes: &[u8]) -> Result<(), DaemonError> {
    let worker = tree.get_data::<Worker>(handle)?;
    let conn = worker.conn.as_ref().ok_or(ub_wire::WireError::PeerClosed)?;
    let framed = ub_wire::frame(header_bytes);
    nix::unistd::write(conn, &framed)?;
    Ok(())
}

#[path = "worker_tests.rs"]
#[cfg(test)]
mod tests;
