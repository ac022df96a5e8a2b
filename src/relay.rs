// Copyright 2026-Present. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The relay: owns the listening endpoint, the accepted client, the
//! upstream connection, and the control channel, and runs the forwarding
//! event loop with the recovery state machine layered over it.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::os::fd::{AsFd, AsRawFd, FromRawFd, IntoRawFd};
use std::path::PathBuf;

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::socket::{bind, listen, socket, AddressFamily, Backlog, SockFlag, SockType, SockaddrIn};

use crate::config::RelayConfig;
use crate::connect::{connect_with_timeout, ConnectStatus};
use crate::control::ControlChannel;
use crate::error::RelayError;
use crate::forward::{self, ForwardOutcome};
use crate::message::{Command, MessageType, Payload};

/// What the control dispatch table (see `message.rs`) asked the event loop
/// to do once a request finished being handled.
enum ControlOutcome {
    Continue,
    Shutdown,
}

/// What `run` returned control to the caller for.
pub enum RunOutcome {
    /// `SHUTDOWN` was received, teardown ran, and the process should exit
    /// zero.
    ShutdownRequested,
}

pub struct Relay {
    pub from_port: u16,
    pub to_port: u16,
    pub listener: TcpListener,
    pub client: Option<TcpStream>,
    pub upstream: Option<TcpStream>,
    pub control: ControlChannel,
    pub control_path: PathBuf,
    pub client_peer: Option<SocketAddr>,
}

fn validate_ports(from_port: u16, to_port: u16) -> Result<(), RelayError> {
    if from_port == 0 || to_port == 0 {
        return Err(RelayError::Setup {
            reason: "port out of range",
            source: io::Error::new(io::ErrorKind::InvalidInput, "ports must be in 1..=65535"),
        });
    }
    if from_port == to_port {
        return Err(RelayError::Setup {
            reason: "from-port and to-port must differ",
            source: io::Error::new(io::ErrorKind::InvalidInput, "from_port == to_port"),
        });
    }
    Ok(())
}

fn bind_listener(from_port: u16) -> Result<TcpListener, RelayError> {
    let fd = socket(AddressFamily::Inet, SockType::Stream, SockFlag::empty(), None).map_err(
        |source| RelayError::Setup {
            reason: "allocate listener socket",
            source: io::Error::from(source),
        },
    )?;

    let addr = SockaddrIn::from(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, from_port));
    bind(fd.as_raw_fd(), &addr).map_err(|source| RelayError::Setup {
        reason: "bind listener",
        source: io::Error::from(source),
    })?;

    // Backlog of 1: this is a single-tenant relay, never more than one
    // pending connection matters.
    listen(&fd, Backlog::new(1).expect("1 is a valid listen backlog")).map_err(|source| {
        RelayError::Setup {
            reason: "listen on listener socket",
            source: io::Error::from(source),
        }
    })?;

    // Safety: `fd` was just allocated above and bound/listened on directly;
    // this is the sole owner handing off to `TcpListener`.
    Ok(unsafe { TcpListener::from_raw_fd(fd.into_raw_fd()) })
}

fn is_transient_close(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::BrokenPipe
    )
}

impl Relay {
    /// Validates `from_port`/`to_port`, binds the listener and control
    /// socket, accepts the first client, and connects to the upstream
    /// server, all synchronously before the event loop starts.
    pub fn setup(
        from_port: u16,
        to_port: u16,
        control_path: PathBuf,
        config: &RelayConfig,
    ) -> Result<Relay, RelayError> {
        validate_ports(from_port, to_port)?;

        let listener = bind_listener(from_port)?;
        let control = ControlChannel::bind(&control_path).map_err(|source| RelayError::Setup {
            reason: "bind control socket",
            source,
        })?;

        let mut relay = Relay {
            from_port,
            to_port,
            listener,
            client: None,
            upstream: None,
            control,
            control_path,
            client_peer: None,
        };

        relay.accept_client()?;
        let upstream = relay.connect_to_server(config)?;
        relay.upstream = Some(upstream);

        Ok(relay)
    }

    /// Assembles a relay from handles adopted during a handoff, plus a
    /// freshly (re)bound control channel at the same `control_path` the
    /// donor owned.
    pub fn from_adopted(
        from_port: u16,
        to_port: u16,
        listener: TcpListener,
        client: Option<TcpStream>,
        upstream: Option<TcpStream>,
        control: ControlChannel,
        control_path: PathBuf,
    ) -> Relay {
        Relay {
            from_port,
            to_port,
            listener,
            client,
            upstream,
            control,
            control_path,
            client_peer: None,
        }
    }

    /// Closes the previously-accepted client (if any — a no-op if absent)
    /// and blocks for a new one.
    pub fn accept_client(&mut self) -> Result<(), RelayError> {
        self.client = None;
        let (stream, peer) = self.listener.accept()?;
        self.client_peer = Some(peer);
        self.client = Some(stream);
        Ok(())
    }

    /// Retries `connect_with_timeout` until success, sleeping
    /// `connect_retry_delay` between attempts.
    fn connect_to_server(&self, config: &RelayConfig) -> Result<TcpStream, RelayError> {
        loop {
            tracing::info!(to_port = self.to_port, "connecting to server...");
            match connect_with_timeout(self.to_port, config.connect_timeout)? {
                ConnectStatus::Succeeded(stream) => {
                    tracing::info!(to_port = self.to_port, "connected to server");
                    return Ok(stream);
                }
                ConnectStatus::Later => {
                    tracing::debug!(
                        to_port = self.to_port,
                        retry_in = ?config.connect_retry_delay,
                        "server not ready yet; retrying"
                    );
                    std::thread::sleep(config.connect_retry_delay);
                }
            }
        }
    }

    /// Closes every handle in order and removes the control path. Absent
    /// handles are no-ops; removing an already-absent path is not an error.
    pub fn teardown(self) -> io::Result<()> {
        let Relay {
            listener,
            client,
            upstream,
            control,
            control_path,
            ..
        } = self;
        drop(listener);
        drop(client);
        drop(upstream);
        drop(control);
        match std::fs::remove_file(&control_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Runs the event loop until `SHUTDOWN` is received (teardown already
    /// ran by the time this returns) or a fatal error unwinds.
    pub fn run(mut self, config: &RelayConfig) -> Result<RunOutcome, RelayError> {
        loop {
            let (control_ready, client_ready, upstream_ready) = self.wait_for_readiness()?;

            if control_ready {
                match self.handle_control()? {
                    ControlOutcome::Shutdown => {
                        self.teardown().map_err(RelayError::Io)?;
                        return Ok(RunOutcome::ShutdownRequested);
                    }
                    ControlOutcome::Continue => {}
                }
            }

            if client_ready {
                self.service_client()?;
            }

            if upstream_ready {
                self.service_upstream(config)?;
            }
        }
    }

    /// Polls the watched set with an infinite wait, omitting any absent
    /// handle from the set entirely rather than relying on a fixed-size
    /// array with unused slots.
    fn wait_for_readiness(&self) -> Result<(bool, bool, bool), RelayError> {
        let mut fds = Vec::with_capacity(3);
        fds.push(PollFd::new(self.control.as_fd(), PollFlags::POLLIN));
        if let Some(client) = &self.client {
            fds.push(PollFd::new(client.as_fd(), PollFlags::POLLIN));
        }
        if let Some(upstream) = &self.upstream {
            fds.push(PollFd::new(upstream.as_fd(), PollFlags::POLLIN));
        }

        poll(&mut fds, PollTimeout::NONE).map_err(|source| RelayError::Io(io::Error::from(source)))?;

        let ready = |pf: &PollFd| !pf.revents().unwrap_or_else(PollFlags::empty).is_empty();

        let control_ready = ready(&fds[0]);
        let mut idx = 1;
        let client_ready = if self.client.is_some() {
            let r = ready(&fds[idx]);
            idx += 1;
            r
        } else {
            false
        };
        let upstream_ready = if self.upstream.is_some() {
            ready(&fds[idx])
        } else {
            false
        };

        Ok((control_ready, client_ready, upstream_ready))
    }

    fn service_client(&mut self) -> Result<(), RelayError> {
        let mut client = self
            .client
            .take()
            .expect("service_client is only called when client is present");
        let outcome = {
            let upstream = self
                .upstream
                .as_mut()
                .expect("upstream is present whenever the loop services client readability");
            forward::forward(&mut client, upstream)
        };

        match outcome {
            Ok(ForwardOutcome::Complete) => {
                self.client = Some(client);
                Ok(())
            }
            Ok(ForwardOutcome::Closed) => {
                drop(client);
                tracing::info!(from_port = self.from_port, "client closed; awaiting a new connection");
                self.accept_client()
            }
            Err(e) if is_transient_close(&e) => {
                drop(client);
                tracing::info!(from_port = self.from_port, error = %e, "client connection reset; awaiting a new connection");
                self.accept_client()
            }
            Err(e) => Err(RelayError::Io(e)),
        }
    }

    fn service_upstream(&mut self, config: &RelayConfig) -> Result<(), RelayError> {
        let mut upstream = self
            .upstream
            .take()
            .expect("service_upstream is only called when upstream is present");
        let outcome = {
            let client = self
                .client
                .as_mut()
                .expect("client is present whenever the loop services upstream readability");
            forward::forward(&mut upstream, client)
        };

        match outcome {
            Ok(ForwardOutcome::Complete) => {
                self.upstream = Some(upstream);
                Ok(())
            }
            Ok(ForwardOutcome::Closed) => {
                drop(upstream);
                tracing::info!(to_port = self.to_port, "upstream closed; reconnecting");
                self.upstream = Some(self.connect_to_server(config)?);
                Ok(())
            }
            Err(e) if is_transient_close(&e) => {
                drop(upstream);
                tracing::info!(to_port = self.to_port, error = %e, "upstream connection reset; reconnecting");
                self.upstream = Some(self.connect_to_server(config)?);
                Ok(())
            }
            Err(e) => Err(RelayError::Io(e)),
        }
    }

    /// Decodes and dispatches one control request. Protocol errors (bad
    /// framing, unknown tags) are logged and swallowed — no reply is
    /// attempted for a request that failed to parse as one.
    fn handle_control(&mut self) -> Result<ControlOutcome, RelayError> {
        let (message, attached) = match self.control.recv() {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "control channel protocol error; dropping datagram");
                return Ok(ControlOutcome::Continue);
            }
        };
        // Requests never carry a handle in this protocol; drop it if one
        // somehow arrived rather than leaking the descriptor.
        drop(attached);

        if message.ty != MessageType::Request {
            tracing::warn!(command = ?message.command, "unexpected response on control channel; dropping");
            return Ok(ControlOutcome::Continue);
        }

        match message.command {
            Command::GetPid => {
                let pid = std::process::id();
                self.control.send(&message.respond(Payload::Pid(pid)), None)?;
            }
            Command::GetPorts => {
                self.control.send(
                    &message.respond(Payload::Ports {
                        from_port: self.from_port,
                        to_port: self.to_port,
                    }),
                    None,
                )?;
            }
            Command::GetListener => {
                let fd = self.listener.as_raw_fd();
                self.control.send(&message.respond(Payload::Empty), Some(fd))?;
            }
            Command::GetClient => {
                let fd = self.client.as_ref().map(|s| s.as_raw_fd());
                self.control.send(&message.respond(Payload::Empty), fd)?;
            }
            Command::GetUpstream => {
                let fd = self.upstream.as_ref().map(|s| s.as_raw_fd());
                self.control.send(&message.respond(Payload::Empty), fd)?;
            }
            Command::Shutdown => return Ok(ControlOutcome::Shutdown),
        }

        Ok(ControlOutcome::Continue)
    }
}
