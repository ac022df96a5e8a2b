// Copyright 2026-Present. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Core of a single-tenant TCP relay with a live-upgrade ("handoff")
//! facility: a running relay can hand its client and upstream connections
//! to a freshly launched successor without dropping either side.
//!
//! The CLI front end (argument parsing, usage text, logging setup) lives in
//! [`cli`]; everything else here operates on already-validated parameters.

pub mod cli;
pub mod config;
pub mod connect;
pub mod control;
pub mod error;
pub mod forward;
pub mod handle;
pub mod message;
pub mod relay;
pub mod successor;

pub use error::RelayError;
pub use relay::Relay;
