// Copyright 2026-Present. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The control channel: a named `SOCK_DGRAM` Unix-domain socket carrying
//! [`Message`] records, with an optional single kernel handle attached as
//! `SCM_RIGHTS` ancillary data.
//!
//! Both ends bind a named socket and `connect(2)` it to the peer's path, so
//! a plain `send`/`recv` pair suffices — no per-call destination address is
//! ever threaded through a message header. The ancillary-payload plumbing
//! itself is `sendfd`'s `SendWithFd`/`RecvWithFd`, the same traits
//! `datadog-ipc`'s own `Channel` reads and writes through for its
//! `SCM_RIGHTS` handle passing.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixDatagram;
use std::path::Path;

use sendfd::{RecvWithFd, SendWithFd};

use crate::error::ControlError;
use crate::message::Message;

pub struct ControlChannel {
    socket: UnixDatagram,
}

impl ControlChannel {
    /// Binds a fresh control endpoint at `path`. Used by the relay for its
    /// well-known control socket, and by a successor for the local endpoint
    /// it speaks to the donor from before taking over that same path.
    pub fn bind(path: &Path) -> io::Result<Self> {
        Ok(ControlChannel {
            socket: UnixDatagram::bind(path)?,
        })
    }

    /// Binds `local_path` and fixes `peer_path` as the default destination,
    /// so subsequent `send`/`recv` calls need no address.
    pub fn connect(local_path: &Path, peer_path: &Path) -> io::Result<Self> {
        let socket = UnixDatagram::bind(local_path)?;
        socket.connect(peer_path)?;
        Ok(ControlChannel { socket })
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.socket.set_nonblocking(nonblocking)
    }

    /// Sends `message`, optionally attaching `handle` as `SCM_RIGHTS`
    /// ancillary data in the same datagram.
    pub fn send(&self, message: &Message, handle: Option<RawFd>) -> Result<(), ControlError> {
        let bytes = message.encode();
        let fds: &[RawFd] = match &handle {
            Some(fd) => std::slice::from_ref(fd),
            None => &[],
        };
        self.socket.send_with_fd(&bytes, fds)?;
        Ok(())
    }

    /// Receives one message, extracting any attached handle. Returns
    /// `ControlError::Malformed`/`UnknownCommand`/`UnknownType` from
    /// [`Message::decode`] if the payload doesn't parse.
    pub fn recv(&self) -> Result<(Message, Option<OwnedFd>), ControlError> {
        let mut data_buf = [0u8; crate::message::WIRE_LEN];
        // The protocol never attaches more than one handle to a message.
        let mut fds = [0 as RawFd; 1];

        let (n, fd_count) = self.socket.recv_with_fd(&mut data_buf, &mut fds)?;
        let message = Message::decode(&data_buf[..n])?;

        // Safety: `fd_count` descriptors were just received into `fds` by
        // the kernel via `recvmsg`'s `SCM_RIGHTS` handling; this call takes
        // sole ownership of the one this channel received.
        let handle = (fd_count == 1).then(|| unsafe { OwnedFd::from_raw_fd(fds[0]) });

        Ok((message, handle))
    }
}

impl AsRawFd for ControlChannel {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}
