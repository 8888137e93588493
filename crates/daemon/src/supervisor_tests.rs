// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::os::fd::IntoRawFd;

use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use ub_core::EventDetail;

use super::*;

fn test_socket_name(case: &str) -> String {
    format!("ubridged-test-{case}-{}", std::process::id())
}

fn new_observer(tree: &mut ResourceTree, listener: NodeHandle, state: ObserverState) -> (NodeHandle, OwnedFd) {
    let (ours, theirs) = ub_wire::create_pair().unwrap();
    let pid = Pid::from_raw(std::process::id() as i32);
    let handle = tree
        .create(Some(listener), format!("observer-{}", ours.as_raw_fd()), NodeFlags::empty(), Observer {
            pid,
            comms: ours,
            state,
            idle_timer: None,
        })
        .unwrap();
    (handle, theirs)
}

#[test]
fn create_listener_binds_and_registers_io() {
    let mut tree = ResourceTree::new();
    let handle = create_listener(&mut tree, &test_socket_name("bind")).unwrap();
    assert_eq!(tree.get_full_id(handle).unwrap(), "ubridge");
    assert!(tree.get_data::<Listener>(handle).is_ok());
}

#[test]
fn find_idle_observer_prefers_first_idle_in_creation_order() {
    let mut tree = ResourceTree::new();
    let listener = create_listener(&mut tree, &test_socket_name("find-idle")).unwrap();

    let (running, _peer1) = new_observer(&mut tree, listener, ObserverState::Running);
    let (idle_a, _peer2) = new_observer(&mut tree, listener, ObserverState::Idle);
    let (idle_b, _peer3) = new_observer(&mut tree, listener, ObserverState::Idle);

    let found = find_idle_observer(&tree, listener).unwrap();
    assert_eq!(found, Some(idle_a));
    assert_ne!(found, Some(running));
    assert_ne!(found, Some(idle_b));
}

#[test]
fn find_idle_observer_returns_none_when_all_running() {
    let mut tree = ResourceTree::new();
    let listener = create_listener(&mut tree, &test_socket_name("none-idle")).unwrap();
    new_observer(&mut tree, listener, ObserverState::Running);

    assert_eq!(find_idle_observer(&tree, listener).unwrap(), None);
}

#[test]
fn observer_comms_event_tracks_running_and_idle() {
    let mut tree = ResourceTree::new();
    let listener = create_listener(&mut tree, &test_socket_name("comms")).unwrap();
    let (handle, peer) = new_observer(&mut tree, listener, ObserverState::Idle);

    ub_wire::send(peer.as_raw_fd(), InternalCommsCommand::Running, None).unwrap();
    on_observer_comms_event(&mut tree, handle, EventDetail::Io(EpollFlags::EPOLLIN));
    assert_eq!(tree.get_data::<Observer>(handle).unwrap().state, ObserverState::Running);

    ub_wire::send(peer.as_raw_fd(), InternalCommsCommand::Idle, None).unwrap();
    on_observer_comms_event(&mut tree, handle, EventDetail::Io(EpollFlags::EPOLLIN));
    let observer = tree.get_data::<Observer>(handle).unwrap();
    assert_eq!(observer.state, ObserverState::Idle);
    assert!(observer.idle_timer.is_some());
}

#[test]
fn idle_timeout_sends_sigterm_and_marks_fini() {
    let mut tree = ResourceTree::new();
    let listener = create_listener(&mut tree, &test_socket_name("idle-timeout")).unwrap();
    let (handle, _peer) = new_observer(&mut tree, listener, ObserverState::Idle);
    // Almost certainly unassigned; kill() failing here is fine, only the
    // state transition this callback makes is under test.
    tree.get_data_mut::<Observer>(handle).unwrap().pid = Pid::from_raw(i32::MAX - 1);
    arm_idle_timer(&mut tree, handle).unwrap();

    on_idle_timeout_event(&mut tree, handle, EventDetail::Io(EpollFlags::EPOLLIN));

    let observer = tree.get_data::<Observer>(handle).unwrap();
    assert_eq!(observer.state, ObserverState::Fini);
    assert!(observer.idle_timer.is_none());
}

#[test]
fn accept_connection_cancels_idle_timer_and_sets_init() {
    let mut tree = ResourceTree::new();
    let listener = create_listener(&mut tree, &test_socket_name("accept-cancels")).unwrap();
    let (handle, peer) = new_observer(&mut tree, listener, ObserverState::Idle);
    arm_idle_timer(&mut tree, handle).unwrap();

    let (conn, _keep_alive) = nix::unistd::pipe().unwrap();
    accept_connection_and_pass_to_worker(&mut tree, listener, conn.into_raw_fd()).unwrap();
    let _ = ub_wire::recv(peer.as_raw_fd()).unwrap();

    let observer = tree.get_data::<Observer>(handle).unwrap();
    assert_eq!(observer.state, ObserverState::Init);
    assert!(observer.idle_timer.is_none());
}

#[test]
fn observer_comms_event_destroys_node_on_peer_loss() {
    let mut tree = ResourceTree::new();
    let listener = create_listener(&mut tree, &test_socket_name("peer-loss")).unwrap();
    let (handle, peer) = new_observer(&mut tree, listener, ObserverState::Idle);
    drop(peer);

    on_observer_comms_event(&mut tree, handle, EventDetail::Io(EpollFlags::EPOLLIN));
    assert!(tree.get_data::<Observer>(handle).is_err());
}

#[test]
fn observer_child_event_destroys_observer() {
    let mut tree = ResourceTree::new();
    let listener = create_listener(&mut tree, &test_socket_name("child-exit")).unwrap();
    let (handle, _peer) = new_observer(&mut tree, listener, ObserverState::Running);

    let pid = Pid::from_raw(99999);
    on_observer_child_event(&mut tree, handle, EventDetail::Child { pid, status: WaitStatus::Exited(pid, 0) });
    assert!(tree.get_data::<Observer>(handle).is_err());
    assert_eq!(tree.get_children_count(listener).unwrap(), 0);
}
