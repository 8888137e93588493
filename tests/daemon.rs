// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end daemon specs: run the real `ubridged` binary as a child
//! process and drive the wire protocol over its abstract-namespace socket,
//! the way a real client would.

use std::os::fd::{AsRawFd, OwnedFd};
use std::path::PathBuf;
use std::process::Child;
use std::time::Duration;

use nix::sys::socket::{self, AddressFamily, SockFlag, SockType, UnixAddr};
use ub_wire::{Command as CommandTag, RawCommandHeader, Version, MSG_SIZE_PREFIX_LEN, PROTOCOL};

fn socket_name(case: &str) -> String {
    format!("ubridged-spec-{case}-{}", std::process::id())
}

// `ubridged` lives in a different workspace member than this integration
// test's own package, so Cargo does not populate `CARGO_BIN_EXE_ubridged`
// for it; locate the binary relative to this test's own executable instead.
fn ubridged_bin_path() -> PathBuf {
    let mut path = std::env::current_exe().expect("current exe");
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push(if cfg!(windows) { "ubridged.exe" } else { "ubridged" });
    path
}

struct Daemon {
    child: Child,
    socket_name: String,
}

impl Daemon {
    fn spawn(case: &str) -> Self {
        let socket_name = socket_name(case);
        let child = std::process::Command::new(ubridged_bin_path())
            .env("UBRIDGED_SOCKET_PATH", &socket_name)
            .spawn()
            .expect("spawn ubridged");
        Daemon { child, socket_name }
    }

    fn connect(&self) -> OwnedFd {
        let fd = socket::socket(AddressFamily::Unix, SockType::Stream, SockFlag::empty(), None)
            .expect("client socket");
        let addr = UnixAddr::new_abstract(self.socket_name.as_bytes()).expect("abstract addr");
        // The daemon needs a moment to bind after spawning; retry instead of
        // racing its startup.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            match socket::connect(fd.as_raw_fd(), &addr) {
                Ok(()) => return fd,
                Err(nix::errno::Errno::ECONNREFUSED) if std::time::Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(e) => panic!("connect failed: {e}"),
            }
        }
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn send_command(fd: &OwnedFd, header: RawCommandHeader) {
    let framed = ub_wire::frame(&header.to_bytes());
    nix::unistd::write(fd, &framed).expect("write frame");
}

fn read_reply(fd: &OwnedFd) -> RawCommandHeader {
    let mut len_buf = [0u8; MSG_SIZE_PREFIX_LEN];
    read_exact(fd, &mut len_buf);
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    read_exact(fd, &mut body);
    RawCommandHeader::from_bytes(&body).expect("decode reply header")
}

fn read_exact(fd: &OwnedFd, buf: &mut [u8]) {
    let mut filled = 0;
    while filled < buf.len() {
        let n = nix::unistd::read(fd.as_raw_fd(), &mut buf[filled..]).expect("read");
        assert!(n > 0, "peer closed mid-frame");
        filled += n;
    }
}

#[test]
fn version_roundtrip_across_a_real_connection() {
    let daemon = Daemon::spawn("version");
    let client = daemon.connect();

    send_command(&client, RawCommandHeader::new(PROTOCOL, CommandTag::Version, 0, Vec::new()));
    let reply = read_reply(&client);

    assert_eq!(reply.command(), CommandTag::Reply);
    assert!(!reply.is_failure());
    assert_eq!(Version::from_bytes(&reply.data), Some(Version::parse(ub_daemon::env::PROTOCOL_VERSION)));
}

#[test]
fn protocol_downgrade_is_flagged_and_server_protocol_is_echoed() {
    let daemon = Daemon::spawn("downgrade");
    let client = daemon.connect();

    send_command(&client, RawCommandHeader::new(PROTOCOL + 9, CommandTag::Version, 0, Vec::new()));
    let reply = read_reply(&client);

    assert!(reply.is_failure());
    assert_eq!(reply.protocol, PROTOCOL);
}

#[test]
fn identify_commits_properties_and_a_fresh_connection_reuses_the_idle_worker() {
    let daemon = Daemon::spawn("identify");
    let client = daemon.connect();

    let mut payload = Vec::new();
    payload.extend_from_slice(b"ACTION=add\0");
    payload.extend_from_slice(b"DEVNAME=loop0\0");
    payload.extend_from_slice(b"SUBSYSTEM=block\0");

    send_command(&client, RawCommandHeader::new(PROTOCOL, CommandTag::Identify, 0, payload));
    let reply = read_reply(&client);
    assert!(!reply.is_failure());

    // Each connection carries exactly one command; a fresh connection must
    // be served either by the same worker going idle or a new one.
    drop(client);
    let second = daemon.connect();
    send_command(&second, RawCommandHeader::new(PROTOCOL, CommandTag::Version, 0, Vec::new()));
    let reply2 = read_reply(&second);
    assert!(!reply2.is_failure());
}
