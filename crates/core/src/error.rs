// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

use crate::id::NodeHandle;

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("parent node {0:?} not found")]
    NoSuchParent(NodeHandle),

    #[error("node {0:?} not found")]
    NoSuchNode(NodeHandle),

    #[error("node {0:?} has no owned event loop")]
    NoEventLoop(NodeHandle),

    #[error("no ancestor of node {0:?} owns an event loop")]
    NoLoopOwner(NodeHandle),

    #[error("node data for {0:?} is not of the requested type")]
    WrongType(NodeHandle),

    #[error("node {0:?} disallows isolation")]
    IsolationDisallowed(NodeHandle),

    #[error("walk from {0:?} is restricted by node flags")]
    WalkRestricted(NodeHandle),

    #[error("duplicate child id {1:?} under parent {0:?}")]
    DuplicateId(NodeHandle, smol_str::SmolStr),

    #[error(transparent)]
    Reactor(#[from] ReactorError),
}

#[derive(Debug, Error)]
pub enum ReactorError {
    #[error("epoll operation failed: {0}")]
    Epoll(#[source] nix::Error),

    #[error("signalfd operation failed: {0}")]
    SignalFd(#[source] nix::Error),

    #[error("timerfd operation failed: {0}")]
    TimerFd(#[source] nix::Error),

    #[error("child-reaping (waitpid) failed: {0}")]
    Wait(#[source] nix::Error),

    #[error("unknown event source handle")]
    UnknownSource,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<nix::Error> for ReactorError {
    fn from(e: nix::Error) -> Self {
        ReactorError::Epoll(e)
    }
}
