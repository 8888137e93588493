// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The packed wire header: `{u8 protocol; u8 cmd_number; u64 status; data[]}`.

use crate::error::WireError;

pub const HEADER_LEN: usize = 1 + 1 + 8;

/// `UBRIDGE_PROTOCOL` — the protocol version this build speaks. Command
/// negotiation downgrades to `min(ours, theirs)`.
pub const PROTOCOL: u8 = 1;

pub const COMMAND_STATUS_FAILURE: u64 = 0x1;

/// `__CMD_START`/`__CMD_END`: command numbers live in the open range
/// `(CMD_START, CMD_END)`; anything outside it coerces to [`Command::Unknown`].
const CMD_START: u8 = 0;
const CMD_END: u8 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Unknown = 0,
    Reply = 1,
    Version = 2,
    Identify = 3,
    Checkpoint = 4,
}

impl Command {
    /// Coerces a raw byte into a known command, mapping anything outside
    /// `(CMD_START, CMD_END)` — including `CMD_START` itself — to `Unknown`.
    pub fn from_raw(n: u8) -> Self {
        if n <= CMD_START || n >= CMD_END {
            return Command::Unknown;
        }
        match n {
            1 => Command::Reply,
            2 => Command::Version,
            3 => Command::Identify,
            4 => Command::Checkpoint,
            _ => Command::Unknown,
        }
    }

    pub fn as_raw(self) -> u8 {
        self as u8
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
    pub release: u16,
}

impl Version {
    /// Parses `CARGO_PKG_VERSION`-shaped `major.minor.release`, defaulting
    /// missing components to zero.
    pub fn parse(s: &str) -> Self {
        let mut parts = s.split('.').map(|p| p.parse::<u16>().unwrap_or(0));
        Version {
            major: parts.next().unwrap_or(0),
            minor: parts.next().unwrap_or(0),
            release: parts.next().unwrap_or(0),
        }
    }

    pub fn to_bytes(self) -> [u8; 6] {
        let mut out = [0u8; 6];
        out[0..2].copy_from_slice(&self.major.to_le_bytes());
        out[2..4].copy_from_slice(&self.minor.to_le_bytes());
        out[4..6].copy_from_slice(&self.release.to_le_bytes());
        out
    }

    pub fn from_bytes(b: &[u8]) -> Option<Self> {
        if b.len() < 6 {
            return None;
        }
        Some(Version {
            major: u16::from_le_bytes([b[0], b[1]]),
            minor: u16::from_le_bytes([b[2], b[3]]),
            release: u16::from_le_bytes([b[4], b[5]]),
        })
    }
}

#[derive(Clone, Debug)]
pub struct RawCommandHeader {
    pub protocol: u8,
    pub cmd_number: u8,
    pub status: u64,
    pub data: Vec<u8>,
}

impl RawCommandHeader {
    pub fn new(protocol: u8, command: Command, status: u64, data: Vec<u8>) -> Self {
        Self { protocol, cmd_number: command.as_raw(), status, data }
    }

    pub fn command(&self) -> Command {
        Command::from_raw(self.cmd_number)
    }

    pub fn is_failure(&self) -> bool {
        self.status & COMMAND_STATUS_FAILURE != 0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.data.len());
        out.push(self.protocol);
        out.push(self.cmd_number);
        out.extend_from_slice(&self.status.to_le_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < HEADER_LEN {
            return Err(WireError::ShortHeader(HEADER_LEN, buf.len()));
        }
        let status = u64::from_le_bytes(buf[2..10].try_into().expect("checked len"));
        Ok(Self {
            protocol: buf[0],
            cmd_number: buf[1],
            status,
            data: buf[HEADER_LEN..].to_vec(),
        })
    }
}

/// The protocol actually used for a connection is the minimum of what
/// both ends announced.
pub fn negotiate(ours: u8, theirs: u8) -> u8 {
    ours.min(theirs)
}

#[path = "header_tests.rs"]
#[cfg(test)]
mod tests;
