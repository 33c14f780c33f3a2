//! pipelog - rotating stderr log collector
//!
//! Usage:
//!   pipelog run -- <command>...   Capture the command's stderr into rotating logs
//!   pipelog -forklog ...          Collector child process (internal)

use anyhow::{bail, Context, Result};
use clap::Parser;
use pipelog::cli::{Cli, Command};
use pipelog::config::{self, CollectorConfig};
use pipelog::constants::FORKLOG_MARKER;
use pipelog::{collector, launcher, logging};
use std::path::Path;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    // Collector mode is selected before clap ever sees the argument list;
    // the marker and the argv layout are fixed by the supervisor side.
    if args.len() > 1 && args[1] == FORKLOG_MARKER {
        let fork_args = launcher::parse_fork_args(&args[1..])?;
        collector::run_from_args(fork_args)?;
        return Ok(());
    }

    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    match cli.command {
        Command::Run { data_dir, command } => run_supervised(&data_dir, &command),
    }
}

/// Minimal supervision harness around the collector.
///
/// After `Spawner::start`, this process's stdout and stderr point at the
/// shared pipe, so the command spawned below inherits them and its stderr
/// flows into the rotating logs. The collector notices EOF and exits on its
/// own once this process and the command are gone.
fn run_supervised(data_dir: &Path, command: &[String]) -> Result<()> {
    let Some(program) = command.first() else {
        bail!("missing command");
    };

    let config = CollectorConfig::load(&config::config_path(data_dir));

    let mut spawner = launcher::Spawner::new();
    spawner
        .start(&config, data_dir)
        .context("starting log collector")?;

    let status = std::process::Command::new(program)
        .args(&command[1..])
        .status()
        .with_context(|| format!("running {}", program))?;

    std::process::exit(status.code().unwrap_or(1));
}
