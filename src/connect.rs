// Copyright 2026-Present. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Non-blocking connect-with-timeout to the upstream server, so a
//! not-yet-listening peer never hangs the event loop.

use std::net::TcpStream;
use std::os::fd::{AsFd, AsRawFd, FromRawFd, IntoRawFd, OwnedFd};
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::socket::{connect, socket, AddressFamily, SockFlag, SockType, SockaddrIn};

use crate::error::RelayError;

/// Outcome of a single connect attempt.
#[derive(Debug)]
pub enum ConnectStatus {
    Succeeded(TcpStream),
    /// Peer not ready yet (refused, aborted, or timed out waiting for
    /// writability); caller should sleep and retry with a fresh socket.
    Later,
}

fn set_nonblocking(fd: &OwnedFd, nonblocking: bool) -> nix::Result<()> {
    let raw = fd.as_raw_fd();
    let current = OFlag::from_bits_truncate(fcntl(raw, FcntlArg::F_GETFL)?);
    let updated = if nonblocking {
        current | OFlag::O_NONBLOCK
    } else {
        current & !OFlag::O_NONBLOCK
    };
    fcntl(raw, FcntlArg::F_SETFL(updated))?;
    Ok(())
}

/// Attempts one non-blocking connect to `loopback:port`, polling for
/// writability up to `timeout`: allocate, switch non-blocking, connect, and
/// either proceed immediately, classify the peer as not-yet-ready, or poll
/// for the connect to complete.
pub fn connect_with_timeout(port: u16, timeout: Duration) -> Result<ConnectStatus, RelayError> {
    let fd = socket(
        AddressFamily::Inet,
        SockType::Stream,
        SockFlag::empty(),
        None,
    )
    .map_err(|source| RelayError::Setup {
        reason: "allocate upstream socket",
        source: std::io::Error::from(source),
    })?;

    set_nonblocking(&fd, true).map_err(|source| RelayError::Setup {
        reason: "set upstream socket non-blocking",
        source: std::io::Error::from(source),
    })?;

    let addr = SockaddrIn::from(std::net::SocketAddrV4::new(std::net::Ipv4Addr::LOCALHOST, port));

    match connect(fd.as_raw_fd(), &addr) {
        Ok(()) => {}
        Err(e @ (Errno::ECONNABORTED | Errno::ECONNREFUSED)) => {
            tracing::debug!(port, error = %e, "upstream not ready yet");
            return Ok(ConnectStatus::Later);
        }
        Err(Errno::EINPROGRESS) => {
            let pollfd = PollFd::new(fd.as_fd(), PollFlags::POLLOUT);
            let mut fds = [pollfd];
            match poll(&mut fds, PollTimeout::try_from(timeout).unwrap_or(PollTimeout::MAX)) {
                Ok(0) => {
                    tracing::warn!(port, ?timeout, "connection timed out");
                    return Ok(ConnectStatus::Later);
                }
                Ok(_) => {}
                Err(Errno::EINTR) => return Ok(ConnectStatus::Later),
                Err(source) => {
                    return Err(RelayError::Setup {
                        reason: "poll for upstream writability",
                        source: std::io::Error::from(source),
                    })
                }
            }

            // Safety: `fd` was just allocated above and has not been
            // duplicated; handing it to `TcpStream` transfers ownership of
            // the sole reference.
            let probe = unsafe { TcpStream::from_raw_fd(fd.into_raw_fd()) };
            return match probe.take_error() {
                Ok(None) => {
                    probe.set_nonblocking(false).map_err(|source| RelayError::Setup {
                        reason: "restore upstream socket to blocking",
                        source,
                    })?;
                    Ok(ConnectStatus::Succeeded(probe))
                }
                Ok(Some(error)) => {
                    tracing::warn!(port, %error, "connect failed");
                    Ok(ConnectStatus::Later)
                }
                Err(_) => Ok(ConnectStatus::Later),
            };
        }
        Err(source) => {
            return Err(RelayError::Setup {
                reason: "connect to upstream",
                source: std::io::Error::from(source),
            })
        }
    }

    // Safety: same as above — sole owner of a freshly allocated fd.
    let stream = unsafe { TcpStream::from_raw_fd(fd.into_raw_fd()) };
    stream.set_nonblocking(false).map_err(|source| RelayError::Setup {
        reason: "restore upstream socket to blocking",
        source,
    })?;
    Ok(ConnectStatus::Succeeded(stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, TcpListener};

    #[test]
    fn connects_immediately_to_a_listening_loopback_port() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();

        match connect_with_timeout(port, Duration::from_secs(1)).unwrap() {
            ConnectStatus::Succeeded(_) => {}
            ConnectStatus::Later => panic!("expected immediate success"),
        }
    }

    #[test]
    fn reports_later_when_nothing_is_listening() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        match connect_with_timeout(port, Duration::from_millis(200)).unwrap() {
            ConnectStatus::Later => {}
            ConnectStatus::Succeeded(_) => panic!("nothing should be listening"),
        }
    }
}
