// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C4 — the supervisor: the top-level `Listener` node (bound to the
//! abstract-namespace socket) and the `Observer` node type it keeps one of
//! per live worker process.

use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};

use nix::sys::epoll::EpollFlags;
use nix::sys::signal::{SigSet, Signal};
use nix::sys::socket::{
    self, AddressFamily, Backlog, SockFlag, SockType, UnixAddr,
};
use nix::unistd::{ForkResult, Pid};
use ub_core::{NodeFlags, NodeHandle, NodeKind, ResourceTree, ResourceType, SourceKey};
use ub_wire::InternalCommsCommand;

use crate::env;
use crate::error::DaemonError;
use crate::worker;

pub struct Listener {
    pub socket: OwnedFd,
    pub generation: u64,
}

impl NodeKind for Listener {
    const TYPE: ResourceType = ResourceType { name: "ubridge", owns_event_loop: true, owns_watchdog: false };
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ObserverState {
    Init,
    Idle,
    Running,
    Fini,
}

pub struct Observer {
    pub pid: Pid,
    pub comms: OwnedFd,
    pub state: ObserverState,
    pub idle_timer: Option<SourceKey>,
}

impl NodeKind for Observer {
    const TYPE: ResourceType = ResourceType { name: "observer", owns_event_loop: false, owns_watchdog: false };
}

/// Binds the abstract-namespace listening socket and creates the root
/// `Listener` node, registering the accept loop on its own event loop.
pub fn create_listener(tree: &mut ResourceTree, socket_name: &str) -> Result<NodeHandle, DaemonError> {
    let fd = socket::socket(
        AddressFamily::Unix,
        SockType::Stream,
        SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
        None,
    )?;
    let addr = UnixAddr::new_abstract(socket_name.as_bytes())
        .map_err(|e| DaemonError::Bind(socket_name.to_string(), e))?;
    socket::bind(fd.as_raw_fd(), &addr).map_err(|e| DaemonError::Bind(socket_name.to_string(), e))?;
    let backlog = Backlog::new(16).map_err(DaemonError::Nix)?;
    socket::listen(&fd, backlog).map_err(DaemonError::Nix)?;

    let handle = tree.create(None, "ubridge", NodeFlags::empty(), Listener { socket: fd, generation: 0 })?;

    let listen_fd = tree.get_data::<Listener>(handle)?.socket.as_raw_fd();
    tree.register_io(handle, listen_fd, EpollFlags::EPOLLIN, on_listener_readable)?;

    tracing::info!(socket = %socket_name, "listening on abstract-namespace socket");
    Ok(handle)
}

fn on_listener_readable(tree: &mut ResourceTree, handle: NodeHandle, _detail: ub_core::EventDetail) {
    loop {
        let listen_fd = match tree.get_data::<Listener>(handle) {
            Ok(l) => l.socket.as_raw_fd(),
            Err(_) => return,
        };
        let conn_fd = match socket::accept4(listen_fd, SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC) {
            Ok(fd) => fd,
            Err(nix::errno::Errno::EAGAIN) => return,
            Err(e) => {
                tracing::warn!(error = %e, "accept4 failed");
                return;
            }
        };
        if let Err(e) = accept_connection_and_pass_to_worker(tree, handle, conn_fd) {
            tracing::warn!(error = %e, "failed to hand connection to a worker");
        }
    }
}

/// `_accept_connection_and_pass_to_worker`: find an idle observer or spawn
/// a fresh worker, then pass the accepted fd across the internal comms
/// channel and mark the observer `Running`.
fn accept_connection_and_pass_to_worker(
    tree: &mut ResourceTree,
    listener: NodeHandle,
    conn_fd: RawFd,
) -> Result<(), DaemonError> {
    let observer = find_idle_observer(tree, listener)?.map(Ok).unwrap_or_else(|| spawn_worker(tree, listener))?;

    let comms_fd = tree.get_data::<Observer>(observer)?.comms.as_raw_fd();
    ub_wire::send(comms_fd, InternalCommsCommand::Running, Some(conn_fd))?;
    // The supervisor's copy of the connection fd is no longer needed once
    // it has been passed to the worker.
    let _ = nix::unistd::close(conn_fd);

    cancel_idle_timer(tree, observer)?;
    tree.get_data_mut::<Observer>(observer)?.state = ObserverState::Init;
    Ok(())
}

fn find_idle_observer(tree: &ResourceTree, listener: NodeHandle) -> Result<Option<NodeHandle>, DaemonError> {
    for child in tree.children_of_type::<Observer>(listener)? {
        if tree.get_data::<Observer>(child)?.state == ObserverState::Idle {
            return Ok(Some(child));
        }
    }
    Ok(None)
}

/// `_spawn_worker`: block all signals, fork, and build either a fresh
/// `Worker` (child) or a new `Observer` (parent) depending on which side of
/// the fork we're on. The saved signal mask is restored only by the
/// process that observes a nonzero `pid` — in practice only the parent,
/// since the child's own `pid == 0`.
fn spawn_worker(tree: &mut ResourceTree, listener: NodeHandle) -> Result<NodeHandle, DaemonError> {
    let (supervisor_end, worker_end) = ub_wire::create_pair()?;

    let full_mask = SigSet::all();
    let saved_mask = full_mask.thread_swap_mask(nix::sys::signal::SigmaskHow::SIG_SETMASK)?;

    // SAFETY: the child performs only async-signal-safe work (rebuilding
    // its own process-local resource tree) before installing real signal
    // handling via a fresh signalfd.
    match unsafe { nix::unistd::fork() }.map_err(DaemonError::Fork)? {
        ForkResult::Child => {
            drop(supervisor_end);
            worker::run(worker_end).unwrap_or_else(|e| {
                tracing::error!(error = %e, "worker exited with an error");
                std::process::exit(1);
            });
            std::process::exit(0);
        }
        ForkResult::Parent { child } => {
            drop(worker_end);
            saved_mask.thread_set_mask()?;

            let handle = tree.create(
                Some(listener),
                format!("observer-{child}"),
                NodeFlags::empty(),
                Observer { pid: child, comms: supervisor_end, state: ObserverState::Idle, idle_timer: None },
            )?;
            let comms_fd = tree.get_data::<Observer>(handle)?.comms.as_raw_fd();
            tree.register_io(handle, comms_fd, EpollFlags::EPOLLIN, on_observer_comms_event)?;
            tree.register_child(handle, child, on_observer_child_event)?;
            Ok(handle)
        }
    }
}

/// Arms the observer's idle timer: `WORKER_IDLE_TIMEOUT_USEC` from now,
/// one-shot. On expiry the observer sends `SIGTERM` to its worker — the
/// supervisor, not the worker, owns this decision (`ubridge.c`'s
/// `_on_observer_child_timeout` runs in the parent).
fn arm_idle_timer(tree: &mut ResourceTree, handle: NodeHandle) -> Result<(), DaemonError> {
    let key = tree.register_time(handle, env::worker_idle_timeout(), true, on_idle_timeout_event)?;
    tree.get_data_mut::<Observer>(handle)?.idle_timer = Some(key);
    Ok(())
}

fn cancel_idle_timer(tree: &mut ResourceTree, handle: NodeHandle) -> Result<(), DaemonError> {
    if let Some(key) = tree.get_data_mut::<Observer>(handle)?.idle_timer.take() {
        tree.destroy_source(handle, key)?;
    }
    Ok(())
}

fn on_idle_timeout_event(tree: &mut ResourceTree, handle: NodeHandle, _detail: ub_core::EventDetail) {
    let Ok(observer) = tree.get_data_mut::<Observer>(handle) else { return };
    observer.idle_timer = None;
    observer.state = ObserverState::Fini;
    let pid = observer.pid;

    tracing::debug!(?pid, "worker idle timeout elapsed, sending SIGTERM");
    if let Err(e) = nix::sys::signal::kill(pid, Signal::SIGTERM) {
        tracing::warn!(?pid, error = %e, "failed to signal idle worker");
    }
}

fn on_observer_comms_event(tree: &mut ResourceTree, handle: NodeHandle, _detail: ub_core::EventDetail) {
    let comms_fd = match tree.get_data::<Observer>(handle) {
        Ok(o) => o.comms.as_raw_fd(),
        Err(_) => return,
    };
    match ub_wire::recv(comms_fd) {
        Ok((InternalCommsCommand::Idle, _)) => {
            if let Ok(data) = tree.get_data_mut::<Observer>(handle) {
                data.state = ObserverState::Idle;
            }
            if let Err(e) = arm_idle_timer(tree, handle) {
                tracing::warn!(error = %e, "failed to arm observer idle timer");
            }
        }
        Ok((InternalCommsCommand::Running, _)) => {
            if let Ok(data) = tree.get_data_mut::<Observer>(handle) {
                data.state = ObserverState::Running;
            }
        }
        Err(ub_wire::WireError::Nix(nix::errno::Errno::EAGAIN | nix::errno::Errno::EINTR)) => {}
        Err(e) => {
            tracing::debug!(error = %e, "observer comms channel closed");
            let _ = tree.destroy(handle);
        }
    }
}

fn on_observer_child_event(tree: &mut ResourceTree, handle: NodeHandle, detail: ub_core::EventDetail) {
    if let ub_core::EventDetail::Child { pid, status } = detail {
        tracing::debug!(?pid, ?status, "worker process exited");
    }
    let _ = tree.destroy(handle);
}

pub fn run(tree: &mut ResourceTree, listener: NodeHandle) -> Result<i32, DaemonError> {
    Ok(tree.run_event_loop(listener)?)
}

#[path = "supervisor_tests.rs"]
#[cfg(test)]
mod tests;
