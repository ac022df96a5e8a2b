// Copyright 2026-Present. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The control message: a fixed-layout record exchanged over the control
//! datagram socket, plus the optional single-handle ancillary payload that
//! rides alongside it out-of-band.
//!
//! The in-memory representation is an explicit, discriminated Rust enum —
//! not a C-style overlaid union. Handle-ness is a
//! property of the [`Command`] alone, computed once in [`Command::carries_handle`],
//! never tracked by a parallel flag.

use crate::error::ControlError;

/// One control-channel exchange is a request followed by a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Request,
    Response,
}

impl MessageType {
    fn to_wire(self) -> u32 {
        match self {
            MessageType::Request => 0,
            MessageType::Response => 1,
        }
    }

    fn from_wire(tag: u32) -> Result<Self, ControlError> {
        match tag {
            0 => Ok(MessageType::Request),
            1 => Ok(MessageType::Response),
            other => Err(ControlError::UnknownType(other)),
        }
    }
}

/// The administrative operations the control channel supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    GetPid,
    GetListener,
    GetClient,
    GetUpstream,
    GetPorts,
    Shutdown,
}

impl Command {
    /// Whether a *response* to this command carries an attached kernel
    /// handle in the ancillary payload. Requests never carry a handle.
    pub fn carries_handle(self) -> bool {
        matches!(
            self,
            Command::GetListener | Command::GetClient | Command::GetUpstream
        )
    }

    fn to_wire(self) -> u32 {
        match self {
            Command::GetPid => 0,
            Command::GetListener => 1,
            Command::GetClient => 2,
            Command::GetUpstream => 3,
            Command::GetPorts => 4,
            Command::Shutdown => 5,
        }
    }

    fn from_wire(tag: u32) -> Result<Self, ControlError> {
        match tag {
            0 => Ok(Command::GetPid),
            1 => Ok(Command::GetListener),
            2 => Ok(Command::GetClient),
            3 => Ok(Command::GetUpstream),
            4 => Ok(Command::GetPorts),
            5 => Ok(Command::Shutdown),
            other => Err(ControlError::UnknownCommand(other)),
        }
    }
}

/// The payload, tagged by [`Command`]. Variants overlap no storage; the
/// recipient never needs to guess which field is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    /// Carried inline by `GET_PID` responses.
    Pid(u32),
    /// Carried inline by `GET_PORTS` responses.
    Ports { from_port: u16, to_port: u16 },
    /// Placeholder for handle-bearing commands: the actual descriptor
    /// travels out-of-band in the ancillary payload, never inside these
    /// bytes. Requests and `SHUTDOWN` also use this.
    Empty,
}

/// One control message as exchanged on the wire, minus any ancillary
/// handle (see [`crate::control`] for the combined send/receive that
/// attaches one).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    pub ty: MessageType,
    pub command: Command,
    pub payload: Payload,
}

/// Fixed wire length: 4 bytes type tag + 4 bytes command tag + 4 bytes of
/// payload (sized for the largest inline variant, `Ports`'s two `u16`s).
pub const WIRE_LEN: usize = 12;

impl Message {
    pub fn request(command: Command) -> Self {
        Message {
            ty: MessageType::Request,
            command,
            payload: Payload::Empty,
        }
    }

    /// Build the `RESPONSE` that answers this request: flips `type`,
    /// preserves `command`, and overwrites the payload with the demanded
    /// value.
    pub fn respond(self, payload: Payload) -> Self {
        Message {
            ty: MessageType::Response,
            command: self.command,
            payload,
        }
    }

    pub fn encode(&self) -> [u8; WIRE_LEN] {
        let mut buf = [0u8; WIRE_LEN];
        buf[0..4].copy_from_slice(&self.ty.to_wire().to_ne_bytes());
        buf[4..8].copy_from_slice(&self.command.to_wire().to_ne_bytes());
        match self.payload {
            Payload::Pid(pid) => buf[8..12].copy_from_slice(&pid.to_ne_bytes()),
            Payload::Ports { from_port, to_port } => {
                buf[8..10].copy_from_slice(&from_port.to_ne_bytes());
                buf[10..12].copy_from_slice(&to_port.to_ne_bytes());
            }
            Payload::Empty => {}
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ControlError> {
        if buf.len() < WIRE_LEN {
            return Err(ControlError::Malformed {
                expected: WIRE_LEN,
                got: buf.len(),
            });
        }
        let ty = MessageType::from_wire(u32::from_ne_bytes(buf[0..4].try_into().unwrap()))?;
        let command = Command::from_wire(u32::from_ne_bytes(buf[4..8].try_into().unwrap()))?;

        let payload = match (ty, command) {
            (MessageType::Response, Command::GetPid) => {
                Payload::Pid(u32::from_ne_bytes(buf[8..12].try_into().unwrap()))
            }
            (MessageType::Response, Command::GetPorts) => Payload::Ports {
                from_port: u16::from_ne_bytes(buf[8..10].try_into().unwrap()),
                to_port: u16::from_ne_bytes(buf[10..12].try_into().unwrap()),
            },
            _ => Payload::Empty,
        };

        Ok(Message {
            ty,
            command,
            payload,
        })
    }
}
