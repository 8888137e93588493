// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Parses the `NUL`-separated `KEY=VALUE` uevent payload udev hands the
//! daemon through the `IDENTIFY` command's data section.

use std::collections::HashMap;

use crate::action::UdevAction;
use crate::error::IdentError;

/// The recognized `IDENTIFY` properties, typed out of the raw payload.
/// Anything else stays reachable only through [`Device::get`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Device {
    pub action: UdevAction,
    pub devname: Option<String>,
    pub devtype: Option<String>,
    pub major: Option<u32>,
    pub minor: Option<u32>,
    pub seqnum: Option<u64>,
    pub synth_uuid: Option<String>,
    pub properties: HashMap<String, String>,
}

impl Device {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// The key this device's properties commit under: its `DEVNAME` if
    /// known, otherwise its `major:minor` pair. `None` when neither is
    /// present in the payload — a device with no keyable identity.
    pub fn kv_key_prefix(&self) -> Option<String> {
        if let Some(devname) = &self.devname {
            return Some(devname.clone());
        }
        match (self.major, self.minor) {
            (Some(major), Some(minor)) => Some(format!("{major}:{minor}")),
            _ => None,
        }
    }
}

/// Splits `payload` on `NUL` bytes into `KEY=VALUE` pairs and builds a
/// [`Device`] from the well-known properties, keeping the rest available
/// through [`Device::get`].
pub fn parse(payload: &[u8]) -> Result<Device, IdentError> {
    let mut properties = HashMap::new();
    for entry in payload.split(|&b| b == 0) {
        if entry.is_empty() {
            continue;
        }
        let text = std::str::from_utf8(entry).map_err(|_| IdentError::InvalidEncoding)?;
        if let Some((key, value)) = text.split_once('=') {
            properties.insert(key.to_string(), value.to_string());
        }
    }

    let action = properties
        .get("ACTION")
        .map(|s| UdevAction::parse(s))
        .ok_or(IdentError::MissingAction)?;
    let devname = properties.get("DEVNAME").cloned();
    let devtype = properties.get("DEVTYPE").cloned();
    let major = properties.get("MAJOR").and_then(|s| s.parse().ok());
    let minor = properties.get("MINOR").and_then(|s| s.parse().ok());
    let seqnum = properties.get("SEQNUM").and_then(|s| s.parse().ok());
    let synth_uuid = properties.get("SYNTH_UUID").cloned();

    Ok(Device { action, devname, devtype, major, minor, seqnum, synth_uuid, properties })
}

#[path = "uevent_tests.rs"]
#[cfg(test)]
mod tests;
