// Copyright 2026-Present. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the relay core.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Fatal errors that unwind to the process entry point.
///
/// Transient peer conditions (graceful close, `ECONNRESET`, ...) are never
/// represented here — `is_transient_close` classifies them inline in
/// `service_client`/`service_upstream`, which drive recovery by calling back
/// into `accept_client`/`connect_to_server` instead of propagating an error.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Socket allocation, bind, listen, or initial accept failed during
    /// setup. Reported on stderr by the caller; process exits nonzero.
    #[error("setup failed: {reason}: {source}")]
    Setup {
        /// What step of setup failed (e.g. "bind listener", "bind control socket").
        reason: &'static str,
        #[source]
        source: io::Error,
    },

    /// An I/O error distinct from graceful peer close occurred while
    /// forwarding or reconnecting, and recovery is not possible.
    #[error("unrecoverable I/O error: {0}")]
    Io(#[from] io::Error),

    /// The control channel exchange failed in a way that cannot be
    /// recovered from.
    #[error("control channel error: {0}")]
    Control(#[from] ControlError),

    /// The successor's handoff procedure failed. The donor has already
    /// exited (or never existed) by the time this is raised, so there is
    /// nothing to roll back to.
    #[error("handoff failed: {0}")]
    Handoff(String),

    /// `stat` on the control path returned something other than success or
    /// `ENOENT` while the successor waited for quiescence.
    #[error("failed to stat control path {path}: {source}")]
    ControlPathStat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The donor never relinquished the control path within the liveness
    /// budget; see [`crate::successor`] for the bound we apply instead of
    /// looping forever on a leftover path from a donor that crashed
    /// without tearing down.
    #[error("donor at {path} did not relinquish control path within budget")]
    QuiescenceTimeout { path: PathBuf },
}

/// Errors from encoding/decoding or exchanging a single control message.
/// A [`ControlError`] on the *handler* side is logged and dropped as a
/// protocol error; on the *requester* side (successor) it escalates to
/// [`RelayError::Control`].
#[derive(Debug, Error)]
pub enum ControlError {
    /// The datagram's byte payload was shorter than a wire record.
    #[error("malformed message: expected {expected} bytes, got {got}")]
    Malformed { expected: usize, got: usize },

    /// The `command` tag did not match any known variant.
    #[error("unknown command tag: {0}")]
    UnknownCommand(u32),

    /// The `type` tag did not match any known variant.
    #[error("unknown message type tag: {0}")]
    UnknownType(u32),

    /// A handle-bearing response arrived without an attached descriptor.
    #[error("expected an attached handle for command {0:?}, none arrived")]
    MissingHandle(crate::message::Command),

    /// Underlying socket I/O failed while sending or receiving.
    #[error("control channel I/O failed: {0}")]
    Io(#[from] io::Error),
}
