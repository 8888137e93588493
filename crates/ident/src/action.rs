// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use smol_str::SmolStr;

/// The udev `ACTION` property.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UdevAction {
    Add,
    Remove,
    Change,
    Move,
    Online,
    Offline,
    Bind,
    Unbind,
    Unknown(SmolStr),
}

impl UdevAction {
    pub fn parse(s: &str) -> Self {
        match s {
            "add" => UdevAction::Add,
            "remove" => UdevAction::Remove,
            "change" => UdevAction::Change,
            "move" => UdevAction::Move,
            "online" => UdevAction::Online,
            "offline" => UdevAction::Offline,
            "bind" => UdevAction::Bind,
            "unbind" => UdevAction::Unbind,
            other => UdevAction::Unknown(SmolStr::new(other)),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            UdevAction::Add => "add",
            UdevAction::Remove => "remove",
            UdevAction::Change => "change",
            UdevAction::Move => "move",
            UdevAction::Online => "online",
            UdevAction::Offline => "offline",
            UdevAction::Bind => "bind",
            UdevAction::Unbind => "unbind",
            UdevAction::Unknown(s) => s.as_str(),
        }
    }
}
