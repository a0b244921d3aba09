//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;
use tracing::warn;

use omero_downloader::request::{DEFAULT_MAX_WAIT, DEFAULT_POLL_INTERVAL};
use omero_downloader::transfer::DEFAULT_CHUNK_SIZE;
use omero_downloader::{
    ConnectionSettings, Credentials, ExecutorSettings, FileRoleFilter, RunSettings, parse_targets,
};

use crate::config::{FileConfig, VerbositySetting};

/// Download original image files from an OMERO server.
///
/// Targets are given as Type:ids, e.g. Image:1,2 or Dataset:7. Every image
/// contained in a target is downloaded along with its companion files.
#[derive(Parser, Debug)]
#[command(name = "omero-download")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Server host name or base URL [default: localhost]
    #[arg(short, long)]
    pub server: Option<String>,

    /// Server port [default: 4064]
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
    pub port: Option<u16>,

    /// Login name
    #[arg(short, long)]
    pub user: Option<String>,

    /// Login password
    #[arg(short = 'w', long = "pass", env = "OMERO_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Join an existing session instead of logging in
    #[arg(short, long, env = "OMERO_SESSION_KEY", hide_env_values = true)]
    pub key: Option<String>,

    /// Download only binary files
    #[arg(short = 'b', long)]
    pub only_binary: bool,

    /// Download only companion files
    #[arg(short = 'c', long)]
    pub only_companion: bool,

    /// Also download every other image of each image's fileset
    #[arg(short = 'f', long)]
    pub whole_fileset: bool,

    /// Base download directory [default: current directory]
    #[arg(short = 'd', long = "base")]
    pub base_dir: Option<PathBuf>,

    /// Delay between polls of a server-side request in milliseconds (1-60000) [default: 250]
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=60_000))]
    pub poll_interval_ms: Option<u64>,

    /// Give up on a server-side request after this many seconds (1-86400) [default: 300]
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=86_400))]
    pub max_wait_secs: Option<u64>,

    /// Bytes per read in KiB (1-1048576) [default: 1024]
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=1_048_576))]
    pub chunk_size_kib: Option<u64>,

    /// Objects to download, as Type:id[,id...]
    pub targets: Vec<String>,
}

/// Everything the orchestrator needs, after flags and config are merged.
#[derive(Debug)]
pub struct Invocation {
    pub connection: ConnectionSettings,
    pub credentials: Credentials,
    pub run: RunSettings,
}

/// Applies the config file's verbosity when no verbosity flag was given.
pub fn apply_config_verbosity(args: &mut Args, file_config: Option<&FileConfig>) {
    if args.quiet || args.verbose > 0 {
        return;
    }
    match file_config.and_then(|cfg| cfg.verbosity) {
        Some(VerbositySetting::Quiet) => args.quiet = true,
        Some(VerbositySetting::Verbose) => args.verbose = 1,
        Some(VerbositySetting::Debug) => args.verbose = 2,
        Some(VerbositySetting::Default) | None => {}
    }
}

/// Merges flags over config-file defaults and validates the result.
///
/// # Errors
///
/// Returns an error for usage problems: conflicting "only" flags, missing
/// credentials, and missing or malformed targets.
pub fn resolve(
    args: &Args,
    file_config: Option<&FileConfig>,
    show_progress: bool,
) -> Result<Invocation> {
    let defaults = file_config.cloned().unwrap_or_default();

    let Some(filter) = FileRoleFilter::from_flags(args.only_binary, args.only_companion) else {
        bail!("cannot combine multiple 'only' options");
    };
    let targets = parse_targets(&args.targets)?;
    let credentials = resolve_credentials(args, &defaults)?;

    let base = ConnectionSettings::default();
    let connection = ConnectionSettings {
        server: args.server.clone().or(defaults.server).unwrap_or(base.server),
        port: args.port.or(defaults.port).unwrap_or(base.port),
        connect_timeout_secs: defaults
            .connect_timeout_secs
            .unwrap_or(base.connect_timeout_secs),
        read_timeout_secs: defaults.read_timeout_secs.unwrap_or(base.read_timeout_secs),
    };

    let poll_interval = args
        .poll_interval_ms
        .or(defaults.poll_interval_ms)
        .map_or(DEFAULT_POLL_INTERVAL, Duration::from_millis);
    let max_wait = args
        .max_wait_secs
        .or(defaults.max_wait_secs)
        .map_or(DEFAULT_MAX_WAIT, Duration::from_secs);
    let chunk_size = args
        .chunk_size_kib
        .or(defaults.chunk_size_kib)
        .map_or(DEFAULT_CHUNK_SIZE, |kib| kib * 1024);

    let mut run = RunSettings::new(targets);
    run.filter = filter;
    run.whole_container = args.whole_fileset;
    run.base_dir = args.base_dir.clone().or(defaults.base_dir);
    run.executor = ExecutorSettings::new(poll_interval, max_wait);
    run.chunk_size = chunk_size;
    run.show_progress = show_progress;

    Ok(Invocation {
        connection,
        credentials,
        run,
    })
}

fn resolve_credentials(args: &Args, defaults: &FileConfig) -> Result<Credentials> {
    let user = args.user.clone().or_else(|| defaults.user.clone());
    let password = args.password.clone();

    if let Some(key) = args.key.as_deref().filter(|key| !key.is_empty()) {
        if user.is_some() || password.is_some() {
            warn!("session key given, ignoring user name and password");
        }
        return Ok(Credentials::SessionKey(key.to_string()));
    }

    match (user, password) {
        (Some(user), Some(password)) => Ok(Credentials::Password { user, password }),
        (Some(user), None) => {
            bail!("no password given for user '{user}'; pass --pass or set OMERO_PASSWORD")
        }
        (None, _) => bail!("no credentials given; pass --key, or --user with --pass"),
    }
}
