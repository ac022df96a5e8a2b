// Copyright 2026-Present. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;

use evergreen::cli::{Cli, CliCommand};
use evergreen::config::RelayConfig;
use evergreen::relay::{Relay, RunOutcome};
use evergreen::successor;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse_and_validate();
    let config = RelayConfig::default();

    let outcome = match cli.command {
        CliCommand::Proxy {
            from_port,
            to_port,
            control_path,
        } => run_proxy(from_port, to_port, control_path, &config),
        CliCommand::Update { control_path } => run_update(control_path, &config),
    };

    // Explicit on both paths: a relay that exits via SHUTDOWN returns zero,
    // every fatal path returns nonzero. Nothing falls through unreturned.
    match outcome {
        Ok(RunOutcome::ShutdownRequested) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "fatal");
            ExitCode::FAILURE
        }
    }
}

fn run_proxy(
    from_port: u16,
    to_port: u16,
    control_path: PathBuf,
    config: &RelayConfig,
) -> anyhow::Result<RunOutcome> {
    let relay = Relay::setup(from_port, to_port, control_path, config).context("set up relay")?;
    relay.run(config).context("relay event loop")
}

fn run_update(control_path: PathBuf, config: &RelayConfig) -> anyhow::Result<RunOutcome> {
    successor::run_update(control_path, config).context("run handoff")
}
