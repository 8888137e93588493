// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn payload(pairs: &[(&str, &str)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (k, v) in pairs {
        out.extend_from_slice(format!("{k}={v}").as_bytes());
        out.push(0);
    }
    out
}

#[test]
fn parses_well_known_properties() {
    let p = payload(&[
        ("ACTION", "add"),
        ("DEVNAME", "loop0"),
        ("DEVTYPE", "disk"),
        ("MAJOR", "7"),
        ("MINOR", "0"),
        ("SEQNUM", "42"),
        ("SYNTH_UUID", "0"),
    ]);
    let dev = parse(&p).unwrap();
    assert_eq!(dev.action, UdevAction::Add);
    assert_eq!(dev.devname.as_deref(), Some("loop0"));
    assert_eq!(dev.devtype.as_deref(), Some("disk"));
    assert_eq!(dev.major, Some(7));
    assert_eq!(dev.minor, Some(0));
    assert_eq!(dev.seqnum, Some(42));
    assert_eq!(dev.synth_uuid.as_deref(), Some("0"));
}

#[test]
fn unknown_action_is_preserved_verbatim() {
    let p = payload(&[("ACTION", "frobnicate"), ("DEVNAME", "loop0")]);
    let dev = parse(&p).unwrap();
    assert_eq!(dev.action.as_str(), "frobnicate");
}

#[test]
fn missing_action_is_an_error() {
    let p = payload(&[("DEVNAME", "loop0")]);
    assert!(matches!(parse(&p), Err(IdentError::MissingAction)));
}

#[test]
fn non_numeric_major_minor_are_silently_dropped() {
    let p = payload(&[("ACTION", "add"), ("MAJOR", "not-a-number"), ("MINOR", "0")]);
    let dev = parse(&p).unwrap();
    assert_eq!(dev.major, None);
    assert_eq!(dev.minor, Some(0));
}

#[test]
fn kv_key_prefix_prefers_devname_over_major_minor() {
    let p = payload(&[("ACTION", "add"), ("DEVNAME", "loop0"), ("MAJOR", "7"), ("MINOR", "0")]);
    let dev = parse(&p).unwrap();
    assert_eq!(dev.kv_key_prefix().as_deref(), Some("loop0"));
}

#[test]
fn kv_key_prefix_falls_back_to_major_minor() {
    let p = payload(&[("ACTION", "add"), ("MAJOR", "7"), ("MINOR", "0")]);
    let dev = parse(&p).unwrap();
    assert_eq!(dev.kv_key_prefix().as_deref(), Some("7:0"));
}

#[test]
fn kv_key_prefix_is_none_without_devname_or_major_minor() {
    let p = payload(&[("ACTION", "add")]);
    let dev = parse(&p).unwrap();
    assert_eq!(dev.kv_key_prefix(), None);
}

#[test]
fn extra_properties_remain_queryable() {
    let p = payload(&[("ACTION", "add"), ("DEVNAME", "loop0"), ("ID_FS_TYPE", "ext4")]);
    let dev = parse(&p).unwrap();
    assert_eq!(dev.get("ID_FS_TYPE"), Some("ext4"));
}
