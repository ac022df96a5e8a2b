// Copyright 2026-Present. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tunables for the relay core.
//!
//! Pinned values: a 4 KiB forward buffer, a 5 s connect timeout, a 1 s
//! quiescence poll interval. Kept as a small `Default`-able struct rather
//! than bare constants so tests can shrink the timers instead of waiting
//! out the real values, the way a config layer is meant to be used even
//! when nothing external ever overrides it.

use std::time::Duration;

/// Size of the stack buffer used by [`crate::forward::forward`] for a single
/// read/write round. The forwarder never buffers more than one read's worth
/// of bytes across a single `forward` call.
pub const FORWARD_BUFFER_LEN: usize = 4096;

#[derive(Debug, Clone, Copy)]
pub struct RelayConfig {
    /// Total budget for a single non-blocking connect attempt before it is
    /// classified as [`crate::connect::ConnectStatus::Later`].
    pub connect_timeout: Duration,
    /// Delay between successive upstream connect attempts after `Later`.
    pub connect_retry_delay: Duration,
    /// Delay between successive filesystem polls while the successor waits
    /// for the donor's control path to disappear.
    pub quiescence_poll_interval: Duration,
    /// Upper bound on quiescence polls before the successor gives up
    /// (avoids an unbounded wait on a stale leftover path from a donor
    /// that crashed without tearing down).
    pub quiescence_poll_budget: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            connect_timeout: Duration::from_secs(5),
            connect_retry_delay: Duration::from_secs(5),
            quiescence_poll_interval: Duration::from_secs(1),
            quiescence_poll_budget: 120,
        }
    }
}
