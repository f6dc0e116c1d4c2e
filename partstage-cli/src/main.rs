// SPDX-License-Identifier: GPL-3.0-only

mod config;
mod logging;
mod output;
mod script;

use std::path::{Path, PathBuf};
use std::sync::mpsc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use partstage_contracts::{OperationEvent, ProgressSink};
use partstage_core::DeviceSession;
use partstage_testing::{LabSpec, MemoryDisk, spec};
use partstage_types::FileSystemRegistry;

use crate::config::{Config, LoggingLevel};
use crate::output::SessionView;
use crate::script::Script;

/// Stage partition table edits on a simulated msdos device
#[derive(Debug, Parser)]
#[command(name = "partstage")]
#[command(about = "Stage, review and commit msdos partition table edits on lab devices", long_about = None)]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/partstage/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long, global = true, value_enum)]
    log_level: Option<LoggingLevel>,

    /// Do not write a log file
    #[arg(long, global = true)]
    no_log_file: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the partition table of a lab device
    Show {
        /// Lab spec name or path to a lab spec file
        lab: String,
        #[arg(long)]
        json: bool,
        /// Print exact byte counts next to sizes
        #[arg(long)]
        bytes: bool,
    },
    /// Apply an edit script to a lab device and show the result
    Apply {
        /// Lab spec name or path to a lab spec file
        lab: String,
        /// TOML edit script
        script: PathBuf,
        /// Commit the staged edits after the script ran
        #[arg(long)]
        commit: bool,
        #[arg(long)]
        json: bool,
        #[arg(long)]
        bytes: bool,
    },
    /// List the filesystem catalog and its capabilities
    Filesystems {
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    if cli.no_log_file {
        config.log_to_disk = false;
    }
    logging::init(&config);

    match cli.command {
        Command::Show { lab, json, bytes } => {
            let (session, events) = open_lab(&lab)?;
            drain_events(&events);
            print_session(&session, json, bytes || config.show_sizes_as_bytes)
        }
        Command::Apply {
            lab,
            script,
            commit,
            json,
            bytes,
        } => {
            let script = Script::load(&script)?;
            let (mut session, events) = open_lab(&lab)?;

            let outcome = script.run(&mut session).and_then(|()| {
                if commit && !session.log().is_empty() {
                    session.commit()?;
                }
                Ok(())
            });
            drain_events(&events);

            print_session(&session, json, bytes || config.show_sizes_as_bytes)?;
            outcome
        }
        Command::Filesystems { json } => {
            let registry = FileSystemRegistry::builtin();
            if json {
                let specs: Vec<_> = registry.iter().collect();
                println!("{}", serde_json::to_string_pretty(&specs)?);
            } else {
                print!("{}", output::render_filesystems(registry.iter()));
            }
            Ok(())
        }
    }
}

/// A lab argument is a spec file when it names an existing path, a spec name otherwise.
fn load_lab(lab: &str) -> Result<LabSpec> {
    let path = Path::new(lab);
    let spec = if path.is_file() {
        spec::load_from_path(path)?
    } else {
        spec::load_by_name(lab)?
    };
    Ok(spec)
}

fn open_lab(
    lab: &str,
) -> Result<(DeviceSession<MemoryDisk>, mpsc::Receiver<OperationEvent>)> {
    let spec = load_lab(lab)?;
    let disk = MemoryDisk::from_spec(&spec)?;
    let device = spec.device.clone();

    let (tx, rx) = mpsc::channel();
    let session = DeviceSession::open(
        device,
        disk,
        FileSystemRegistry::builtin(),
        ProgressSink::channel(tx),
    )
    .with_context(|| format!("open lab device {}", spec.device))?;

    if let Some(problem) = session.last_probe_error() {
        tracing::warn!("{} opened degraded: {problem}", spec.device);
    }
    Ok((session, rx))
}

fn drain_events(events: &mpsc::Receiver<OperationEvent>) {
    for event in events.try_iter() {
        match event {
            OperationEvent::Progress(progress) => tracing::debug!(
                "{:?} step {}/{}: {}",
                progress.operation,
                progress.step,
                progress.total_steps,
                progress.phase
            ),
            OperationEvent::Completed { operation, .. } => {
                tracing::debug!("{operation:?} completed")
            }
            OperationEvent::Failed {
                operation, error, ..
            } => tracing::warn!("{operation:?} failed: {error}"),
            OperationEvent::TableChanged { device, revision } => {
                tracing::debug!("{device} table changed (revision {revision})")
            }
        }
    }
}

fn print_session(session: &DeviceSession<MemoryDisk>, json: bool, add_bytes: bool) -> Result<()> {
    let view = SessionView::of(session);
    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print!("{}", output::render_session(&view, add_bytes));
    }
    Ok(())
}
