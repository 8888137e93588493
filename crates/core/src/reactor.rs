// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C1 — the per-process event source registry.
//!
//! One [`Reactor`] wraps one `epoll` instance plus the handful of other
//! kernel objects (`signalfd`, `timerfd`) that get multiplexed through it.
//! A process has at most one `Reactor`; it is owned by whichever node in
//! the resource tree has the `owns-event-loop` type flag set (see
//! [`crate::tree`]).

use std::collections::HashMap;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::time::Duration;

use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
use nix::sys::signal::{SigSet, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};
use nix::sys::timerfd::{ClockId, Expiration, TimerFd, TimerFlags, TimerSetTimeFlags};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use crate::error::ReactorError;

/// Opaque reference to one registered event source, scoped to the
/// [`Reactor`] it was registered on.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SourceKey(u64);

/// What fired, handed back from [`Reactor::poll`] alongside the key.
#[derive(Debug)]
pub enum EventDetail {
    Io(EpollFlags),
    Signal(Signal),
    Child { pid: Pid, status: WaitStatus },
    Time,
    Deferred,
}

enum Source {
    Io { fd: RawFd },
    Signal { signum: Signal },
    Child { pid: Pid },
    Time { timer: TimerFd },
}

const SIGNALFD_KEY: u64 = u64::MAX;

pub struct Reactor {
    epoll: Epoll,
    next_key: u64,
    sources: HashMap<u64, Source>,
    signal_mask: SigSet,
    signal_fd: Option<SignalFd>,
    signal_routes: HashMap<Signal, u64>,
    child_routes: HashMap<Pid, u64>,
    deferred: Vec<u64>,
}

impl Reactor {
    pub fn new() -> Result<Self, ReactorError> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)?;
        Ok(Self {
            epoll,
            next_key: 0,
            sources: HashMap::new(),
            signal_mask: SigSet::empty(),
            signal_fd: None,
            signal_routes: HashMap::new(),
            child_routes: HashMap::new(),
            deferred: Vec::new(),
        })
    }

    fn alloc_key(&mut self) -> u64 {
        let key = self.next_key;
        self.next_key += 1;
        key
    }

    pub fn register_io(&mut self, fd: RawFd, interest: EpollFlags) -> Result<SourceKey, ReactorError> {
        let key = self.alloc_key();
        let event = EpollEvent::new(interest, key);
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        self.epoll.add(borrowed, event).map_err(ReactorError::Epoll)?;
        self.sources.insert(key, Source::Io { fd });
        Ok(SourceKey(key))
    }

    pub fn modify_io(&mut self, key: SourceKey, interest: EpollFlags) -> Result<(), ReactorError> {
        let Some(Source::Io { fd }) = self.sources.get(&key.0) else {
            return Err(ReactorError::UnknownSource);
        };
        let mut event = EpollEvent::new(interest, key.0);
        let borrowed = unsafe { BorrowedFd::borrow_raw(*fd) };
        self.epoll.modify(borrowed, &mut event).map_err(ReactorError::Epoll)
    }

    /// Registers interest in a signal. `SIGCHLD` is handled specially: the
    /// first [`Reactor::register_child`] call implicitly adds it.
    pub fn register_signal(&mut self, signum: Signal) -> Result<SourceKey, ReactorError> {
        let key = self.alloc_key();
        self.signal_mask.add(signum);
        self.rebuild_signalfd()?;
        self.signal_routes.insert(signum, key);
        self.sources.insert(key, Source::Signal { signum });
        Ok(SourceKey(key))
    }

    pub fn register_child(&mut self, pid: Pid) -> Result<SourceKey, ReactorError> {
        let key = self.alloc_key();
        if !self.signal_mask.contains(Signal::SIGCHLD) {
            self.signal_mask.add(Signal::SIGCHLD);
            self.rebuild_signalfd()?;
        }
        self.child_routes.insert(pid, key);
        self.sources.insert(key, Source::Child { pid });
        Ok(SourceKey(key))
    }

    pub fn register_time(&mut self, interval: Duration, one_shot: bool) -> Result<SourceKey, ReactorError> {
        let key = self.alloc_key();
        let timer = TimerFd::new(
            ClockId::CLOCK_MONOTONIC,
            TimerFlags::TFD_NONBLOCK | TimerFlags::TFD_CLOEXEC,
        )
        .map_err(ReactorError::TimerFd)?;
        let spec = nix::sys::time::TimeSpec::from_duration(interval);
        let expiration = if one_shot {
            Expiration::OneShot(spec)
        } else {
            Expiration::Interval(spec)
        };
        timer
            .set(expiration, TimerSetTimeFlags::empty())
            .map_err(ReactorError::TimerFd)?;
        let event = EpollEvent::new(EpollFlags::EPOLLIN, key);
        self.epoll.add(timer.as_fd(), event).map_err(ReactorError::Epoll)?;
        self.sources.insert(key, Source::Time { timer });
        Ok(SourceKey(key))
    }

    /// Queues a one-shot callback to fire on the next [`Reactor::poll`]
    /// turn, before any kernel-driven sources — mirrors the original's
    /// deferred command dispatch.
    pub fn register_deferred(&mut self) -> SourceKey {
        let key = self.alloc_key();
        self.deferred.push(key);
        SourceKey(key)
    }

    pub fn destroy(&mut self, key: SourceKey) -> Result<(), ReactorError> {
        match self.sources.remove(&key.0) {
            Some(Source::Io { fd }) => {
                let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
                let _ = self.epoll.delete(borrowed);
            }
            Some(Source::Signal { signum }) => {
                self.signal_routes.remove(&signum);
                if !self.child_routes.values().any(|_| signum == Signal::SIGCHLD) {
                    self.signal_mask.remove(signum);
                    self.rebuild_signalfd()?;
                }
            }
            Some(Source::Child { pid }) => {
                self.child_routes.remove(&pid);
            }
            Some(Source::Time { timer }) => {
                let _ = self.epoll.delete(timer.as_fd());
            }
            None => {
                self.deferred.retain(|k| *k != key.0);
            }
        }
        Ok(())
    }

    pub fn contains(&self, key: SourceKey) -> bool {
        self.sources.contains_key(&key.0)
    }

    fn rebuild_signalfd(&mut self) -> Result<(), ReactorError> {
        if let Some(old) = self.signal_fd.take() {
            let _ = self.epoll.delete(old.as_fd());
        }
        if self.signal_mask.iter().next().is_none() {
            return Ok(());
        }
        self.signal_mask.thread_block().map_err(ReactorError::SignalFd)?;
        let sfd = SignalFd::with_flags(&self.signal_mask, SfdFlags::SFD_NONBLOCK | SfdFlags::SFD_CLOEXEC)
            .map_err(ReactorError::SignalFd)?;
        let event = EpollEvent::new(EpollFlags::EPOLLIN, SIGNALFD_KEY);
        self.epoll.add(sfd.as_fd(), event).map_err(ReactorError::Epoll)?;
        self.signal_fd = Some(sfd);
        Ok(())
    }

    /// Polls for ready sources, draining any deferred callbacks first.
    pub fn poll(&mut self, timeout: EpollTimeout) -> Result<Vec<(SourceKey, EventDetail)>, ReactorError> {
        if !self.deferred.is_empty() {
            let drained: Vec<_> = self.deferred.drain(..).collect();
            return Ok(drained
                .into_iter()
                .map(|k| (SourceKey(k), EventDetail::Deferred))
                .collect());
        }

        let mut buf = [EpollEvent::empty(); 32];
        let n = self.epoll.wait(&mut buf, timeout).map_err(ReactorError::Epoll)?;
        let mut out = Vec::with_capacity(n);
        for ev in &buf[..n] {
            let data = ev.data();
            if data == SIGNALFD_KEY {
                out.extend(self.drain_signalfd()?);
            } else if let Some(Source::Io { .. }) = self.sources.get(&data) {
                out.push((SourceKey(data), EventDetail::Io(ev.events())));
            } else if let Some(Source::Time { timer }) = self.sources.get(&data) {
                let mut scratch = [0u8; 8];
                let _ = nix::unistd::read(timer.as_fd().as_raw_fd(), &mut scratch);
                out.push((SourceKey(data), EventDetail::Time));
            }
        }
        Ok(out)
    }

    fn drain_signalfd(&mut self) -> Result<Vec<(SourceKey, EventDetail)>, ReactorError> {
        let mut out = Vec::new();
        let mut signums = Vec::new();
        {
            let Some(sfd) = self.signal_fd.as_mut() else {
                return Ok(out);
            };
            while let Some(siginfo) = sfd.read_signal().map_err(ReactorError::SignalFd)? {
                let signum = Signal::try_from(siginfo.ssi_signo as i32).map_err(|_| ReactorError::UnknownSource)?;
                signums.push(signum);
            }
        }
        for signum in signums {
            if signum == Signal::SIGCHLD {
                out.extend(self.reap_children()?);
            } else if let Some(&key) = self.signal_routes.get(&signum) {
                out.push((SourceKey(key), EventDetail::Signal(signum)));
            }
        }
        Ok(out)
    }

    fn reap_children(&mut self) -> Result<Vec<(SourceKey, EventDetail)>, ReactorError> {
        let mut out = Vec::new();
        loop {
            match waitpid(None, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) | Err(nix::errno::Errno::ECHILD) => break,
                Ok(status) => {
                    let pid = match status {
                        WaitStatus::Exited(pid, _)
                        | WaitStatus::Signaled(pid, _, _)
                        | WaitStatus::Stopped(pid, _)
                        | WaitStatus::Continued(pid) => pid,
                        _ => continue,
                    };
                    if let Some(&key) = self.child_routes.get(&pid) {
                        out.push((SourceKey(key), EventDetail::Child { pid, status }));
                    }
                }
                Err(e) => return Err(ReactorError::Wait(e)),
            }
        }
        Ok(out)
    }
}

#[path = "reactor_tests.rs"]
#[cfg(test)]
mod tests;
