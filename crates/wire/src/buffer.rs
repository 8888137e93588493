// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The message buffer collaborator from `buffer-common.h`, trimmed to the
//! `MALLOC`/`LINEAR` backend actually exercised by the command pipeline.
//! `MEMFD`/`VECTOR` buffers exist in the original for shared-memory and
//! scatter-gather use cases this daemon's command traffic never needs.

use crate::error::WireError;

pub const MSG_SIZE_PREFIX_LEN: usize = std::mem::size_of::<u32>();

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferMode {
    Plain,
    SizePrefix,
}

/// A growable byte buffer used both for assembling an outgoing frame and for
/// accumulating bytes read off a socket until a full frame is available.
#[derive(Debug, Default)]
pub struct Buffer {
    mode: BufferMode,
    data: Vec<u8>,
    limit: Option<usize>,
}

impl Default for BufferMode {
    fn default() -> Self {
        BufferMode::Plain
    }
}

impl Buffer {
    pub fn new(mode: BufferMode, limit: Option<usize>) -> Self {
        Self { mode, data: Vec::new(), limit }
    }

    pub fn mode(&self) -> BufferMode {
        self.mode
    }

    pub fn used(&self) -> usize {
        self.data.len()
    }

    pub fn reset(&mut self) {
        self.data.clear();
    }

    pub fn append(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        if let Some(limit) = self.limit {
            if self.data.len() + bytes.len() > limit {
                return Err(WireError::FrameTooLarge(self.data.len() + bytes.len(), limit));
            }
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// In [`BufferMode::SizePrefix`], returns the complete frame (length
    /// prefix stripped) once enough bytes have accumulated, draining them
    /// from the buffer.
    pub fn take_frame(&mut self) -> Result<Option<Vec<u8>>, WireError> {
        if self.mode != BufferMode::SizePrefix {
            let out = std::mem::take(&mut self.data);
            return Ok(if out.is_empty() { None } else { Some(out) });
        }
        if self.data.len() < MSG_SIZE_PREFIX_LEN {
            return Ok(None);
        }
        let len = u32::from_le_bytes(self.data[..MSG_SIZE_PREFIX_LEN].try_into().expect("checked len")) as usize;
        if let Some(limit) = self.limit {
            if len > limit {
                return Err(WireError::FrameTooLarge(len, limit));
            }
        }
        let total = MSG_SIZE_PREFIX_LEN + len;
        if self.data.len() < total {
            return Ok(None);
        }
        let frame = self.data[MSG_SIZE_PREFIX_LEN..total].to_vec();
        self.data.drain(..total);
        Ok(Some(frame))
    }
}

/// Wraps `payload` with its `MSG_SIZE_PREFIX_TYPE` length prefix for
/// transmission.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(MSG_SIZE_PREFIX_LEN + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

#[path = "buffer_tests.rs"]
#[cfg(test)]
mod tests;
