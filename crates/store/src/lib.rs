// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! C3 — the typed key-value store backing device property state.
//!
//! Keys are composed of a prefix and a name joined by [`KEY_JOIN`], exactly
//! as in the original's `key_prefix`/`key` split (the prefix is normally a
//! device's full resource id, the name a udev property name). Values carry
//! three independent bit flags — [`ValueFlags::VECTOR`], `REF`, `MERGE` —
//! whose eight combinations (rows `A` through `H` below, in the original
//! header's lettering) each produce a distinct stored and returned shape.

mod error;
mod iter;

pub use error::StoreError;
pub use iter::KvStoreIter;

use std::collections::HashMap;
use std::sync::Arc;

use bitflags::bitflags;

pub const KEY_JOIN: &str = ":";

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct ValueFlags: u32 {
        const VECTOR = 0x0000_0001;
        const REF    = 0x0000_0002;
        const MERGE  = 0x0000_0004;
    }
}

/// Caller-supplied value, shaped to match the `VECTOR`/`REF` flags it will
/// be set with.
pub enum Input<'a> {
    /// Non-`REF` scalar: deep-copied into the store.
    Bytes(&'a [u8]),
    /// `REF` scalar: the store clones the `Arc`, aliasing the caller's data.
    Shared(Arc<[u8]>),
    /// Non-`REF` `VECTOR`: each part is deep-copied.
    Parts(&'a [&'a [u8]]),
    /// `REF` `VECTOR`: each part's `Arc` is cloned, aliasing the caller's data.
    SharedParts(Vec<Arc<[u8]>>),
}

/// A value as stored and handed back by the store. The variant is fully
/// determined by the flags it was set with — see [`build_value`].
#[derive(Clone, Debug)]
pub enum KvData {
    Scalar(Vec<u8>),
    SharedScalar(Arc<[u8]>),
    Vector(Vec<Vec<u8>>),
    SharedVector(Vec<Arc<[u8]>>),
}

impl KvData {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            KvData::Scalar(v) => Some(v),
            KvData::SharedScalar(v) => Some(v),
            _ => None,
        }
    }
}

/// Resolves a duplicate key: return `true` to replace the stored value with
/// the incoming one, `false` to keep the stored value. Mirrors
/// `kv_resolver_t`'s `0`/`1` return convention.
pub type SetResolver<'a> = dyn FnMut(&str, &str, Option<&KvData>, &KvData) -> bool + 'a;

/// Confirms an unset: return `true` to actually remove the value.
pub type UnsetResolver<'a> = dyn FnMut(&str, &str, &KvData) -> bool + 'a;

/// Builds the stored representation for one of the eight `VECTOR`/`REF`/
/// `MERGE` combinations. Row letters match `include/kv-store.h`'s table.
fn build_value(input: Input<'_>, flags: ValueFlags) -> Result<KvData, StoreError> {
    let vector = flags.contains(ValueFlags::VECTOR);
    let refd = flags.contains(ValueFlags::REF);
    let merge = flags.contains(ValueFlags::MERGE);

    match (input, vector, refd) {
        // A, B: !VECTOR, !REF (MERGE has no effect on a scalar)
        (Input::Bytes(b), false, false) => Ok(KvData::Scalar(b.to_vec())),
        // C, D: !VECTOR, REF (MERGE has no effect)
        (Input::Shared(arc), false, true) => Ok(KvData::SharedScalar(arc)),
        // E: VECTOR, !REF, !MERGE
        (Input::Parts(parts), true, false) if !merge => {
            Ok(KvData::Vector(parts.iter().map(|p| p.to_vec()).collect()))
        }
        // F: VECTOR, !REF, MERGE
        (Input::Parts(parts), true, false) => {
            let merged = parts.iter().flat_map(|p| p.iter().copied()).collect();
            Ok(KvData::Scalar(merged))
        }
        // G: VECTOR, REF, !MERGE
        (Input::SharedParts(parts), true, true) if !merge => Ok(KvData::SharedVector(parts)),
        // H: VECTOR, REF, MERGE — iovec with a single merged entry
        (Input::SharedParts(parts), true, true) => {
            let merged: Vec<u8> = parts.iter().flat_map(|p| p.iter().copied()).collect();
            Ok(KvData::SharedVector(vec![Arc::from(merged.into_boxed_slice())]))
        }
        _ => Err(StoreError::FlagMismatch(flags)),
    }
}

fn compose_key(key_prefix: &str, key: &str) -> String {
    format!("{key_prefix}{KEY_JOIN}{key}")
}

/// `KV_STORE_BACKEND_HASH` — a plain in-memory hash table.
#[derive(Default)]
pub struct KvStore {
    entries: HashMap<String, KvData>,
}

impl KvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_value(
        &mut self,
        key_prefix: &str,
        key: &str,
        input: Input<'_>,
        flags: ValueFlags,
        resolver: Option<&mut SetResolver<'_>>,
    ) -> Result<KvData, StoreError> {
        let full_key = compose_key(key_prefix, key);
        let new_value = build_value(input, flags)?;

        let existing = self.entries.get(&full_key);
        let keep_old = match (existing, resolver) {
            (Some(old), Some(resolve)) => !resolve(key_prefix, key, Some(old), &new_value),
            _ => false,
        };

        if keep_old {
            return Ok(self.entries.get(&full_key).cloned().expect("checked Some above"));
        }

        self.entries.insert(full_key.clone(), new_value.clone());
        tracing::trace!(key = %full_key, "kv_store: set_value");
        Ok(new_value)
    }

    pub fn get_value(&self, key_prefix: &str, key: &str) -> Option<KvData> {
        self.entries.get(&compose_key(key_prefix, key)).cloned()
    }

    pub fn unset_value(
        &mut self,
        key_prefix: &str,
        key: &str,
        resolver: Option<&mut UnsetResolver<'_>>,
    ) -> bool {
        let full_key = compose_key(key_prefix, key);
        let Some(value) = self.entries.get(&full_key) else {
            return false;
        };
        let confirmed = match resolver {
            Some(resolve) => resolve(key_prefix, key, value),
            None => true,
        };
        if confirmed {
            self.entries.remove(&full_key);
            tracing::trace!(key = %full_key, "kv_store: unset_value");
        }
        confirmed
    }

    pub fn iter(&self) -> KvStoreIter<'_> {
        KvStoreIter::new(&self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[path = "store_tests.rs"]
#[cfg(test)]
mod tests;
