// Copyright 2026-Present. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! A typed, owning wrapper around a raw kernel descriptor.
//!
//! Grounded on `datadog-ipc`'s `PlatformHandle<T>`: the phantom type
//! parameter records which concrete socket type the descriptor is valid as
//! (`TcpListener`, `TcpStream`, ...) without paying for that information at
//! runtime, while the real ownership lives in a plain [`OwnedFd`].

use std::marker::PhantomData;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

pub struct Handle<T> {
    fd: OwnedFd,
    phantom: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// Wraps a raw descriptor as a handle typed for `T`.
    ///
    /// # Safety
    ///
    /// The caller must ensure `fd` is open, not otherwise owned, and valid
    /// to use as a `T` (e.g. actually a stream socket if `T =
    /// std::net::TcpStream`).
    pub unsafe fn from_raw_fd(fd: RawFd) -> Self {
        Handle {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
            phantom: PhantomData,
        }
    }
}

impl<T: IntoRawFd> From<T> for Handle<T> {
    fn from(value: T) -> Self {
        // Safety: `value` just gave up its fd via `into_raw_fd`, so this
        // handle is the sole owner.
        unsafe { Handle::from_raw_fd(value.into_raw_fd()) }
    }
}

impl<T: FromRawFd> Handle<T> {
    /// Consumes the handle, recovering the concrete socket type.
    pub fn into_inner(self) -> T {
        // Safety: `self.fd` was valid as a `T` per the invariant established
        // at construction (either `from_raw_fd`'s caller contract or the
        // `From<T>` impl).
        unsafe { T::from_raw_fd(self.fd.into_raw_fd()) }
    }
}

impl<T> AsRawFd for Handle<T> {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl<T> AsFd for Handle<T> {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl<T> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle").field("fd", &self.as_raw_fd()).finish()
    }
}
