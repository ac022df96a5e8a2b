// Copyright 2026-Present. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The successor side of a handoff: adopt a donor's live handles over the
//! control channel, command its shutdown, wait out the quiescence barrier,
//! and resume serving at the same control path.

use std::io;
use std::net::{TcpListener, TcpStream};
use std::os::fd::{FromRawFd, IntoRawFd};
use std::path::{Path, PathBuf};

use crate::config::RelayConfig;
use crate::control::ControlChannel;
use crate::error::{ControlError, RelayError};
use crate::handle::Handle;
use crate::message::{Command, Message, MessageType, Payload};
use crate::relay::{Relay, RunOutcome};

/// Runs the full handoff against `control_path` and, on success, resumes
/// serving as the new relay.
pub fn run_update(control_path: PathBuf, config: &RelayConfig) -> Result<RunOutcome, RelayError> {
    let local_dir = tempfile::tempdir().map_err(|source| {
        RelayError::Handoff(format!("create local control directory: {source}"))
    })?;
    let local_path = local_dir.path().join("update.sock");

    let donor = ControlChannel::connect(&local_path, &control_path)
        .map_err(|source| RelayError::Handoff(format!("bind local control endpoint: {source}")))?;

    let listener = request_handle::<TcpListener>(&donor, Command::GetListener)?
        .ok_or(RelayError::Control(ControlError::MissingHandle(Command::GetListener)))?;
    let client = request_handle::<TcpStream>(&donor, Command::GetClient)?;
    let upstream = request_handle::<TcpStream>(&donor, Command::GetUpstream)?;
    let (from_port, to_port) = request_ports(&donor)?;

    match listener.local_addr() {
        Ok(addr) => tracing::info!(%addr, "adopted listener bound address"),
        Err(source) => tracing::warn!(error = %source, "could not read adopted listener's bound address"),
    }

    donor
        .send(&Message::request(Command::Shutdown), None)
        .map_err(|source| RelayError::Handoff(format!("send SHUTDOWN: {source}")))?;

    // No reply is expected to SHUTDOWN — the donor tears down and exits
    // immediately after dispatch. Drop the local endpoint before waiting so
    // its socket file cannot be confused with the donor's control path.
    drop(donor);
    drop(local_dir);

    wait_for_quiescence(&control_path, config)?;

    let control = ControlChannel::bind(&control_path).map_err(|source| RelayError::Setup {
        reason: "rebind control socket",
        source,
    })?;

    tracing::info!(from_port, to_port, path = %control_path.display(), "handoff complete; resuming service");

    let relay = Relay::from_adopted(from_port, to_port, listener, client, upstream, control, control_path);
    relay.run(config)
}

/// Issues `command` as a request and adopts any handle attached to the
/// response. `None` means the donor had no live handle for that slot at the
/// moment of the request (e.g. `GET_CLIENT` while the donor was between
/// clients) rather than a protocol failure.
fn request_handle<T: FromRawFd>(
    channel: &ControlChannel,
    command: Command,
) -> Result<Option<T>, RelayError> {
    channel
        .send(&Message::request(command), None)
        .map_err(|source| RelayError::Handoff(format!("send {command:?}: {source}")))?;
    let (response, handle) = channel
        .recv()
        .map_err(|source| RelayError::Handoff(format!("receive {command:?} response: {source}")))?;

    if response.ty != MessageType::Response || response.command != command {
        return Err(RelayError::Handoff(format!(
            "unexpected reply to {command:?}: {response:?}"
        )));
    }

    Ok(handle.map(|fd| {
        // Safety: the donor attached this descriptor specifically as the
        // handle for `command`, which names the concrete type `T` expects.
        let adopted: Handle<T> = unsafe { Handle::from_raw_fd(fd.into_raw_fd()) };
        adopted.into_inner()
    }))
}

fn request_ports(channel: &ControlChannel) -> Result<(u16, u16), RelayError> {
    channel
        .send(&Message::request(Command::GetPorts), None)
        .map_err(|source| RelayError::Handoff(format!("send GET_PORTS: {source}")))?;
    let (response, _handle) = channel
        .recv()
        .map_err(|source| RelayError::Handoff(format!("receive GET_PORTS response: {source}")))?;

    match response.payload {
        Payload::Ports { from_port, to_port } => Ok((from_port, to_port)),
        _ => Err(RelayError::Handoff(
            "GET_PORTS response carried no ports payload".into(),
        )),
    }
}

/// Polls for `control_path` to disappear, bounded by
/// `config.quiescence_poll_budget` polls spaced `quiescence_poll_interval`
/// apart. An unbounded wait would hang forever on a stale leftover path
/// from a donor that crashed without tearing down.
fn wait_for_quiescence(control_path: &Path, config: &RelayConfig) -> Result<(), RelayError> {
    for _ in 0..config.quiescence_poll_budget {
        match std::fs::metadata(control_path) {
            Ok(_) => std::thread::sleep(config.quiescence_poll_interval),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(source) => {
                return Err(RelayError::ControlPathStat {
                    path: control_path.to_path_buf(),
                    source,
                })
            }
        }
    }
    Err(RelayError::QuiescenceTimeout {
        path: control_path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{Ipv4Addr, SocketAddrV4, TcpStream as StdTcpStream};
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn wait_for_quiescence_returns_once_the_path_is_removed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("r.sock");
        std::fs::write(&path, b"placeholder").unwrap();

        let path_for_remover = path.clone();
        let remover = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            std::fs::remove_file(&path_for_remover).unwrap();
        });

        let config = RelayConfig {
            quiescence_poll_interval: Duration::from_millis(20),
            quiescence_poll_budget: 50,
            ..RelayConfig::default()
        };
        wait_for_quiescence(&path, &config).unwrap();
        remover.join().unwrap();
    }

    #[test]
    fn wait_for_quiescence_times_out_on_a_stale_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stale.sock");
        std::fs::write(&path, b"leftover").unwrap();

        let config = RelayConfig {
            quiescence_poll_interval: Duration::from_millis(5),
            quiescence_poll_budget: 3,
            ..RelayConfig::default()
        };
        let err = wait_for_quiescence(&path, &config).unwrap_err();
        assert!(matches!(err, RelayError::QuiescenceTimeout { .. }));
    }

    #[test]
    fn full_handoff_preserves_the_client_connection() {
        let echo_listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let to_port = echo_listener.local_addr().unwrap().port();
        std::thread::spawn(move || {
            for stream in echo_listener.incoming() {
                let mut stream = match stream {
                    Ok(s) => s,
                    Err(_) => continue,
                };
                std::thread::spawn(move || {
                    let mut buf = [0u8; 64];
                    loop {
                        match stream.read(&mut buf) {
                            Ok(0) | Err(_) => return,
                            Ok(n) => {
                                if stream.write_all(&buf[..n]).is_err() {
                                    return;
                                }
                            }
                        }
                    }
                });
            }
        });

        let probe = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let from_port = probe.local_addr().unwrap().port();
        drop(probe);

        let dir = tempdir().unwrap();
        let control_path = dir.path().join("donor.sock");
        let config = RelayConfig {
            connect_timeout: Duration::from_millis(500),
            connect_retry_delay: Duration::from_millis(50),
            quiescence_poll_interval: Duration::from_millis(20),
            quiescence_poll_budget: 200,
        };

        let donor_config = config;
        let donor_path = control_path.clone();
        let donor_thread = std::thread::spawn(move || {
            let relay = Relay::setup(from_port, to_port, donor_path, &donor_config).unwrap();
            relay.run(&donor_config)
        });

        std::thread::sleep(Duration::from_millis(100));
        let mut client =
            StdTcpStream::connect(SocketAddrV4::new(Ipv4Addr::LOCALHOST, from_port)).unwrap();
        client.write_all(b"hello").unwrap();
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        let successor_config = config;
        let successor_path = control_path.clone();
        let successor_thread =
            std::thread::spawn(move || run_update(successor_path, &successor_config));

        let donor_outcome = donor_thread.join().unwrap().unwrap();
        assert!(matches!(donor_outcome, RunOutcome::ShutdownRequested));

        client.write_all(b"again").unwrap();
        let mut buf2 = [0u8; 5];
        client.read_exact(&mut buf2).unwrap();
        assert_eq!(&buf2, b"again");
        drop(client);

        // Command the successor's own shutdown so its `run` returns;
        // retry the connect briefly since the successor may still be
        // mid-rebind immediately after the donor's exit.
        let shutdown_dir = tempdir().unwrap();
        let shutdown_local = shutdown_dir.path().join("shutdown.sock");
        let mut attempts = 0;
        let shutdown_channel = loop {
            match ControlChannel::connect(&shutdown_local, &control_path) {
                Ok(channel) => break channel,
                Err(_) if attempts < 50 => {
                    attempts += 1;
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(e) => panic!("could not reach successor control path: {e}"),
            }
        };
        shutdown_channel
            .send(&Message::request(Command::Shutdown), None)
            .unwrap();

        let successor_outcome = successor_thread.join().unwrap().unwrap();
        assert!(matches!(successor_outcome, RunOutcome::ShutdownRequested));
    }
}
