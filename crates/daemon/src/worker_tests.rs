// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use ub_core::EventDetail;
use ub_wire::{Command as CommandTag, RawCommandHeader, PROTOCOL};

use super::*;

fn new_worker_tree() -> (ResourceTree, NodeHandle) {
    let mut tree = ResourceTree::new();
    let (comms, _peer) = ub_wire::create_pair().unwrap();
    let handle = tree
        .create(None, "worker-test", NodeFlags::empty(), Worker {
            comms,
            conn: None,
            conn_source: None,
            read_buf: Buffer::new(BufferMode::SizePrefix, Some(1 << 16)),
            kv: KvStore::new(),
        })
        .unwrap();
    (tree, handle)
}

#[test]
fn accept_connection_installs_conn_source() {
    let (mut tree, handle) = new_worker_tree();

    let (read_end, _write_end) = nix::unistd::pipe().unwrap();
    accept_connection(&mut tree, handle, read_end).unwrap();

    let worker = tree.get_data::<Worker>(handle).unwrap();
    assert!(worker.conn.is_some());
    assert!(worker.conn_source.is_some());
}

#[test]
fn comms_event_running_adopts_passed_connection() {
    let (mut tree, handle) = new_worker_tree();

    // new_worker_tree dropped its peer end; swap in a fresh pair we keep both halves of.
    let (ours, theirs) = ub_wire::create_pair().unwrap();
    tree.get_data_mut::<Worker>(handle).unwrap().comms = ours;

    let (passed_read, _passed_write) = nix::unistd::pipe().unwrap();
    ub_wire::send(theirs.as_raw_fd(), InternalCommsCommand::Running, Some(passed_read.as_raw_fd())).unwrap();
    drop(passed_read);

    on_worker_comms_event(&mut tree, handle, EventDetail::Io(EpollFlags::EPOLLIN));

    let worker = tree.get_data::<Worker>(handle).unwrap();
    assert!(worker.conn.is_some());
}

#[test]
fn cleanup_destroys_commands_resets_buffer_and_reports_idle() {
    let (mut tree, handle) = new_worker_tree();
    let (ours, theirs) = ub_wire::create_pair().unwrap();
    tree.get_data_mut::<Worker>(handle).unwrap().comms = ours;

    let (read_end, _write_end) = nix::unistd::pipe().unwrap();
    accept_connection(&mut tree, handle, read_end).unwrap();
    tree.get_data_mut::<Worker>(handle).unwrap().read_buf.append(&[1, 2, 3]).unwrap();

    let frame = RawCommandHeader::new(PROTOCOL, CommandTag::Version, 0, Vec::new()).to_bytes();
    command::spawn(&mut tree, handle, frame).unwrap();
    assert_eq!(tree.children_of_type::<Command>(handle).unwrap().len(), 1);

    cleanup(&mut tree, handle).unwrap();

    let worker = tree.get_data::<Worker>(handle).unwrap();
    assert_eq!(tree.children_of_type::<Command>(handle).unwrap().len(), 0);
    assert_eq!(worker.read_buf.used(), 0);
    assert!(worker.conn.is_none());

    let (cmd, _) = ub_wire::recv(theirs.as_raw_fd()).unwrap();
    assert_eq!(cmd, InternalCommsCommand::Idle);
}

#[test]
fn sigterm_exits_event_loop() {
    let (mut tree, handle) = new_worker_tree();
    tree.register_signal(handle, nix::sys::signal::Signal::SIGTERM, on_signal_event).unwrap();
    nix::sys::signal::raise(nix::sys::signal::Signal::SIGTERM).unwrap();

    let code = tree.run_event_loop(handle).unwrap();
    assert_eq!(code, 0);
}
