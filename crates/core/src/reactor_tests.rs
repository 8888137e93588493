// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::os::fd::AsRawFd;
use std::time::Duration;

use nix::sys::epoll::{EpollFlags, EpollTimeout};
use nix::unistd::pipe;

use super::*;

#[test]
fn io_source_fires_on_write() {
    let mut reactor = Reactor::new().expect("reactor");
    let (r, w) = pipe().expect("pipe");
    let key = reactor
        .register_io(r.as_raw_fd(), EpollFlags::EPOLLIN)
        .expect("register");

    nix::unistd::write(&w, b"x").expect("write");

    let ready = reactor.poll(EpollTimeout::try_from(Duration::from_secs(1)).expect("timeout")).expect("poll");
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].0, key);
    assert!(matches!(ready[0].1, EventDetail::Io(_)));
}

#[test]
fn deferred_source_fires_before_blocking() {
    let mut reactor = Reactor::new().expect("reactor");
    let key = reactor.register_deferred();
    let ready = reactor.poll(EpollTimeout::ZERO).expect("poll");
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].0, key);
    assert!(matches!(ready[0].1, EventDetail::Deferred));
}

#[test]
fn timer_source_fires_once() {
    let mut reactor = Reactor::new().expect("reactor");
    let key = reactor
        .register_time(Duration::from_millis(10), true)
        .expect("register time");
    let ready = reactor.poll(EpollTimeout::try_from(Duration::from_secs(1)).expect("timeout")).expect("poll");
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].0, key);
    assert!(matches!(ready[0].1, EventDetail::Time));
}

#[test]
fn destroying_a_source_removes_it() {
    let mut reactor = Reactor::new().expect("reactor");
    let (r, w) = pipe().expect("pipe");
    let key = reactor
        .register_io(r.as_raw_fd(), EpollFlags::EPOLLIN)
        .expect("register");
    reactor.destroy(key).expect("destroy");
    nix::unistd::write(&w, b"x").expect("write");
    let ready = reactor.poll(EpollTimeout::ZERO).expect("poll");
    assert!(ready.is_empty());
}
