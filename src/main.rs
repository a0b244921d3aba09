//! CLI entry point for the OMERO downloader.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::io::{self, IsTerminal};
use std::process::ExitCode;

use clap::Parser;
use clap::error::ErrorKind;
use omero_downloader::ProcessExit;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

mod cli;
mod config;
mod terminal;

use cli::Args;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse before tracing so --help prints without log noise.
    let mut args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => return clap_exit(&err).into(),
    };

    let loaded = match config::load_default_file_config() {
        Ok(loaded) => loaded,
        Err(err) => {
            eprintln!("error: {err:#}");
            return ProcessExit::Usage.into();
        }
    };
    cli::apply_config_verbosity(&mut args, loaded.config.as_ref());

    let no_color = terminal::no_color_env_requested() || terminal::is_dumb_terminal();
    terminal::init_tracing(
        terminal::default_log_level(args.quiet, args.verbose),
        no_color,
    );
    debug!(config = ?loaded.path, "config resolved");

    let show_progress = terminal::should_show_progress(
        io::stderr().is_terminal(),
        args.quiet,
        terminal::is_dumb_terminal(),
    );
    let invocation = match cli::resolve(&args, loaded.config.as_ref(), show_progress) {
        Ok(invocation) => invocation,
        Err(err) => {
            eprintln!("error: {err:#}");
            return ProcessExit::Usage.into();
        }
    };

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping");
            interrupt.cancel();
        }
    });

    omero_downloader::run(
        &invocation.connection,
        &invocation.credentials,
        &invocation.run,
        cancel,
    )
    .await
    .into()
}

/// Prints a clap parse outcome and maps it to an exit code.
fn clap_exit(err: &clap::Error) -> ProcessExit {
    let _ = err.print();
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
            ProcessExit::Help
        }
        ErrorKind::DisplayVersion => ProcessExit::Success,
        _ => ProcessExit::Usage,
    }
}
