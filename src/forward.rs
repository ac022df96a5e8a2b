// Copyright 2026-Present. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The byte forwarder: one read, one fully-drained write, no fragmentation
//! across calls.

use std::io::{self, ErrorKind, Read, Write};

use crate::config::FORWARD_BUFFER_LEN;

/// Result of a single forward round-trip. An unrecoverable I/O error is
/// signaled as `Err` rather than folded into this enum, so fatal and
/// recoverable outcomes stay distinguishable by type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// A full read-then-write round completed.
    Complete,
    /// `src` returned zero bytes, or a write returned zero: orderly peer
    /// shutdown on the indicated side.
    Closed,
}

/// Reads once from `src` into a fixed stack buffer, then writes the exact
/// number of bytes received to `dst`, looping the write until fully
/// drained. Never buffers across calls.
pub fn forward<R: Read, W: Write>(src: &mut R, dst: &mut W) -> io::Result<ForwardOutcome> {
    let mut buffer = [0u8; FORWARD_BUFFER_LEN];

    let received = match src.read(&mut buffer) {
        Ok(0) => return Ok(ForwardOutcome::Closed),
        Ok(n) => n,
        Err(e) if e.kind() == ErrorKind::Interrupted => return forward(src, dst),
        Err(e) => return Err(e),
    };

    let mut sent_total = 0;
    while sent_total < received {
        match dst.write(&buffer[sent_total..received]) {
            Ok(0) => return Ok(ForwardOutcome::Closed),
            Ok(n) => sent_total += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(ForwardOutcome::Complete)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    #[test]
    fn forwards_a_single_read_verbatim() {
        // `src`/`src_writer` are the two ends of the inbound leg; the
        // forwarder reads off `src` and writes onto `dst`, whose peer
        // `dst_reader` plays the role of the relay's other side.
        let (mut src, mut src_writer) = UnixStream::pair().unwrap();
        let (mut dst_reader, mut dst) = UnixStream::pair().unwrap();

        src_writer.write_all(b"ping").unwrap();
        src_writer.shutdown(std::net::Shutdown::Write).unwrap();

        let outcome = forward(&mut src, &mut dst).unwrap();
        assert_eq!(outcome, ForwardOutcome::Complete);

        let mut buf = [0u8; 4];
        dst_reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[test]
    fn reports_closed_on_graceful_shutdown() {
        let (mut src, src_writer) = UnixStream::pair().unwrap();
        let (_dst_reader, mut dst) = UnixStream::pair().unwrap();

        drop(src_writer);

        let outcome = forward(&mut src, &mut dst).unwrap();
        assert_eq!(outcome, ForwardOutcome::Closed);
    }
}
