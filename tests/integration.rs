// Copyright 2026-Present. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Black-box process-level scenarios: spawns the built binary exactly the
//! way an operator would, over an actual TCP connection and control path.

use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener, TcpStream};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

fn evergreen_bin() -> &'static str {
    env!("CARGO_BIN_EXE_evergreen")
}

fn free_port() -> u16 {
    TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn kill(mut child: Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[test]
fn s1_basic_relay_round_trips_a_single_message() {
    let echo_listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let to_port = echo_listener.local_addr().unwrap().port();
    std::thread::spawn(move || {
        if let Ok((mut stream, _)) = echo_listener.accept() {
            let mut buf = [0u8; 4];
            if stream.read_exact(&mut buf).is_ok() {
                let _ = stream.write_all(&buf);
            }
        }
    });

    let from_port = free_port();
    let control_path = std::env::temp_dir().join(format!("evergreen-s1-{from_port}.sock"));
    let _ = std::fs::remove_file(&control_path);

    let child = Command::new(evergreen_bin())
        .args([
            "proxy",
            &from_port.to_string(),
            &to_port.to_string(),
            control_path.to_str().unwrap(),
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    std::thread::sleep(Duration::from_millis(200));
    let mut client = TcpStream::connect(SocketAddrV4::new(Ipv4Addr::LOCALHOST, from_port)).unwrap();
    client.write_all(b"ping").unwrap();
    let mut buf = [0u8; 4];
    client.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"ping");

    kill(child);
    let _ = std::fs::remove_file(&control_path);
}

#[test]
fn s5_mismatched_ports_exit_nonzero() {
    let control_path = std::env::temp_dir().join("evergreen-s5-same.sock");
    let _ = std::fs::remove_file(&control_path);

    let status = Command::new(evergreen_bin())
        .args(["proxy", "8000", "8000", control_path.to_str().unwrap()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap();

    assert!(!status.success());
}

#[test]
fn s5_out_of_range_port_exits_nonzero() {
    let control_path = std::env::temp_dir().join("evergreen-s5-range.sock");
    let _ = std::fs::remove_file(&control_path);

    let status = Command::new(evergreen_bin())
        .args(["proxy", "70000", "9000", control_path.to_str().unwrap()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap();

    assert!(!status.success());
}

#[test]
fn s5_missing_subcommand_exits_nonzero() {
    let status = Command::new(evergreen_bin())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap();

    assert!(!status.success());
}

#[test]
fn s6_shutdown_exits_the_donor_zero_and_removes_the_control_path() {
    let echo_listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let to_port = echo_listener.local_addr().unwrap().port();
    std::thread::spawn(move || {
        for stream in echo_listener.incoming() {
            let _ = stream;
        }
    });

    let from_port = free_port();
    let control_path = std::env::temp_dir().join(format!("evergreen-s6-{from_port}.sock"));
    let _ = std::fs::remove_file(&control_path);

    let mut donor = Command::new(evergreen_bin())
        .args([
            "proxy",
            &from_port.to_string(),
            &to_port.to_string(),
            control_path.to_str().unwrap(),
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    std::thread::sleep(Duration::from_millis(200));
    // The donor blocks accepting its first client before it ever services
    // the control channel; a client must be attached for the handoff below
    // to proceed, matching S1's "relay already running" precondition.
    let _client = TcpStream::connect(SocketAddrV4::new(Ipv4Addr::LOCALHOST, from_port)).unwrap();
    std::thread::sleep(Duration::from_millis(100));

    let update_status = Command::new(evergreen_bin())
        .args(["update", control_path.to_str().unwrap()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();

    // `update` adopts the donor and then keeps serving forever; only the
    // donor's own exit code is asserted here, matching the bounded S6
    // scenario. The successor is killed once the donor has confirmed exit.
    let donor_status = donor.wait().unwrap();
    assert!(donor_status.success());
    assert!(!control_path.exists());

    if let Ok(successor) = update_status {
        kill(successor);
    }
}
