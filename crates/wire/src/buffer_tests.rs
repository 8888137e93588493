// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn frame_round_trips_through_size_prefix_buffer() {
    let wire = frame(b"hello");
    let mut buf = Buffer::new(BufferMode::SizePrefix, None);
    buf.append(&wire).unwrap();
    let decoded = buf.take_frame().unwrap().unwrap();
    assert_eq!(decoded, b"hello");
    assert_eq!(buf.used(), 0);
}

#[test]
fn partial_frame_returns_none_until_complete() {
    let wire = frame(b"hello");
    let mut buf = Buffer::new(BufferMode::SizePrefix, None);
    buf.append(&wire[..wire.len() - 2]).unwrap();
    assert!(buf.take_frame().unwrap().is_none());
    buf.append(&wire[wire.len() - 2..]).unwrap();
    assert_eq!(buf.take_frame().unwrap().unwrap(), b"hello");
}

#[test]
fn two_frames_back_to_back_decode_independently() {
    let mut wire = frame(b"a");
    wire.extend(frame(b"bb"));
    let mut buf = Buffer::new(BufferMode::SizePrefix, None);
    buf.append(&wire).unwrap();
    assert_eq!(buf.take_frame().unwrap().unwrap(), b"a");
    assert_eq!(buf.take_frame().unwrap().unwrap(), b"bb");
    assert!(buf.take_frame().unwrap().is_none());
}

#[test]
fn oversized_frame_is_rejected() {
    let mut buf = Buffer::new(BufferMode::SizePrefix, Some(4));
    let wire = frame(b"toolong");
    assert!(buf.append(&wire).is_err() || buf.take_frame().is_err());
}
