// Copyright 2026-Present. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Command-line surface: argument parsing, usage text, and the numeric
//! validation that must fail before any socket is touched.

use std::path::PathBuf;

use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(about = "Single-tenant TCP relay with live-upgrade handoff over a Unix control channel")]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Start a relay forwarding `from-port` to `127.0.0.1:to-port`.
    Proxy {
        from_port: u16,
        to_port: u16,
        control_path: PathBuf,
    },
    /// Run the successor handoff against a relay already listening on
    /// `control-path`, then resume serving in its place.
    Update { control_path: PathBuf },
}

impl Cli {
    /// Parses `argv`, then rejects a same-port `proxy` invocation with
    /// clap's own usage-and-exit path rather than returning a recoverable
    /// error — matching how an out-of-range port is already rejected by
    /// `u16`'s own parsing.
    ///
    /// Usage text names whatever the binary was actually invoked as
    /// (`argv[0]`'s file name) rather than the fixed package name, so a
    /// renamed or symlinked binary reports itself correctly.
    ///
    /// Every usage path — no subcommand, `-h`/`--help`, or a malformed
    /// argument — prints to stderr and exits nonzero. This is why `-h` is
    /// never allowed to take clap's own default exit-zero path: we
    /// intercept every parse error, including `DisplayHelp`, and reroute it
    /// through [`exit_with_usage_error`] instead of calling `e.exit()`.
    pub fn parse_and_validate() -> Cli {
        let mut command = Cli::command();
        if let Some(invoked_as) = std::env::args().next().as_deref().and_then(|a| {
            std::path::Path::new(a)
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_owned)
        }) {
            command = command.name(invoked_as);
        }

        let matches = match command.clone().try_get_matches() {
            Ok(matches) => matches,
            Err(e) => exit_with_usage_error(&e),
        };
        let cli = match Cli::from_arg_matches(&matches) {
            Ok(cli) => cli,
            Err(e) => exit_with_usage_error(&e),
        };

        if let CliCommand::Proxy { from_port, to_port, .. } = &cli.command {
            if from_port == to_port {
                let e = command.error(
                    clap::error::ErrorKind::ValueValidation,
                    "from-port and to-port must differ",
                );
                exit_with_usage_error(&e);
            }
        }
        cli
    }
}

/// Prints `e`'s rendered message to stderr and exits nonzero unconditionally
/// — including for `--help`/`-h`, where clap's own `Error::exit` would print
/// to stdout and exit zero. `-h` is treated the same as any other malformed
/// invocation here: usage text on stderr, nonzero exit.
fn exit_with_usage_error(e: &clap::Error) -> ! {
    eprint!("{e}");
    std::process::exit(1);
}
