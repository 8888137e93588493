// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The internal supervisor/worker control channel: a `socketpair(2)`
//! datagram socket carrying one-byte commands, plus the `SCM_RIGHTS`
//! fd-passing used to hand an accepted client connection from the
//! supervisor to an idle worker.

use std::os::fd::{FromRawFd, OwnedFd, RawFd};

use nix::sys::socket::{
    self, ControlMessage, ControlMessageOwned, MsgFlags, SockFlag, SockType,
};
use std::io::IoSlice;

use crate::error::WireError;

/// `INTERNAL_COMMS_CMD_RUNNING` / `INTERNAL_COMMS_CMD_IDLE`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum InternalCommsCommand {
    Running = 1,
    Idle = 2,
}

impl InternalCommsCommand {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(InternalCommsCommand::Running),
            2 => Some(InternalCommsCommand::Idle),
            _ => None,
        }
    }
}

/// Creates the supervisor/worker control socketpair:
/// `AF_LOCAL, SOCK_DGRAM | SOCK_NONBLOCK | SOCK_CLOEXEC`.
pub fn create_pair() -> Result<(OwnedFd, OwnedFd), WireError> {
    let (a, b) = socket::socketpair(
        socket::AddressFamily::Unix,
        SockType::Datagram,
        None,
        SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
    )?;
    Ok((a, b))
}

/// Sends a one-byte internal comms command, optionally passing a file
/// descriptor as ancillary `SCM_RIGHTS` data.
pub fn send(fd: RawFd, cmd: InternalCommsCommand, passed_fd: Option<RawFd>) -> Result<(), WireError> {
    let payload = [cmd as u8];
    let iov = [IoSlice::new(&payload)];
    match passed_fd {
        Some(pfd) => {
            let fds = [pfd];
            let cmsg = [ControlMessage::ScmRights(&fds)];
            socket::sendmsg::<()>(fd, &iov, &cmsg, MsgFlags::empty(), None)?;
        }
        None => {
            socket::sendmsg::<()>(fd, &iov, &[], MsgFlags::empty(), None)?;
        }
    }
    Ok(())
}

/// Receives a one-byte internal comms command, returning any fd that was
/// passed alongside it.
pub fn recv(fd: RawFd) -> Result<(InternalCommsCommand, Option<OwnedFd>), WireError> {
    let mut buf = [0u8; 1];
    let mut iov = [std::io::IoSliceMut::new(&mut buf)];
    let mut cmsg_space = nix::cmsg_space!([RawFd; 1]);
    let msg = socket::recvmsg::<()>(fd, &mut iov, Some(&mut cmsg_space), MsgFlags::empty())?;

    let mut received_fd = None;
    for cmsg in msg.cmsgs()? {
        if let ControlMessageOwned::ScmRights(fds) = cmsg {
            if let Some(&raw) = fds.first() {
                received_fd = Some(unsafe { OwnedFd::from_raw_fd(raw) });
            }
        }
    }

    if msg.bytes == 0 {
        return Err(WireError::PeerClosed);
    }
    let cmd = InternalCommsCommand::from_byte(buf[0]).ok_or(WireError::PeerClosed)?;
    Ok((cmd, received_fd))
}

#[path = "comms_tests.rs"]
#[cfg(test)]
mod tests;
