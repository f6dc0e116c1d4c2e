// SPDX-License-Identifier: GPL-3.0-only

//! Process-wide tracing setup for the `partstage` binary
//!
//! Events go to stderr (stdout carries command output) and, unless disabled, to
//! a daily-rolling file under `$XDG_STATE_HOME/partstage/logs`.

use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use anyhow::Context;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{Config, LoggingLevel};

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const LOG_PREFIX: &str = "partstage.log";
const KEEP_DAYS: u64 = 7;
const PARTSTAGE_TARGETS: [&str; 5] = [
    "partstage",
    "partstage_core",
    "partstage_types",
    "partstage_contracts",
    "partstage_testing",
];

pub(crate) fn init(config: &Config) {
    let file_layer = if config.log_to_disk {
        match LogTarget::from_env().open() {
            Ok((writer, guard)) => {
                let _ = FILE_GUARD.set(guard);
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!("partstage: file logging disabled: {e:#}");
                None
            }
        }
    } else {
        None
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter(
            std::env::var("RUST_LOG").ok().as_deref(),
            config.log_level,
        ))
        .with(stderr_layer)
        .with(file_layer)
        .init();
}

/// `rust_log` (the value of `RUST_LOG`) when set and valid, otherwise our
/// crates at the configured level and dependencies at warn.
fn env_filter(rust_log: Option<&str>, level: LoggingLevel) -> EnvFilter {
    if let Some(filter) = rust_log.and_then(|value| EnvFilter::try_new(value).ok()) {
        return filter;
    }

    PARTSTAGE_TARGETS
        .iter()
        .filter_map(|target| {
            format!("{target}={}", level.as_directive())
                .parse::<Directive>()
                .ok()
        })
        .fold(EnvFilter::new("warn"), EnvFilter::add_directive)
}

/// Directory and file name prefix of the rolling log.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LogTarget {
    dir: PathBuf,
    prefix: OsString,
}

impl LogTarget {
    fn from_env() -> Self {
        Self::resolve(
            std::env::var_os("PARTSTAGE_LOG_FILE").as_deref(),
            std::env::var_os("PARTSTAGE_LOG_DIR").as_deref(),
        )
    }

    /// An explicit file wins over an explicit directory.
    fn resolve(file: Option<&OsStr>, dir: Option<&OsStr>) -> Self {
        if let Some(file) = file {
            let path = Path::new(file);
            return Self {
                dir: path
                    .parent()
                    .filter(|parent| !parent.as_os_str().is_empty())
                    .map(Path::to_path_buf)
                    .unwrap_or_else(default_log_dir),
                prefix: path
                    .file_name()
                    .map(OsString::from)
                    .unwrap_or_else(|| OsString::from(LOG_PREFIX)),
            };
        }

        Self {
            dir: dir.map(PathBuf::from).unwrap_or_else(default_log_dir),
            prefix: OsString::from(LOG_PREFIX),
        }
    }

    fn open(&self) -> anyhow::Result<(NonBlocking, WorkerGuard)> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create log directory {}", self.dir.display()))?;

        let removed = self.remove_expired(KEEP_DAYS);
        if removed > 0 {
            eprintln!(
                "partstage: removed {removed} log file(s) older than {KEEP_DAYS} days from {}",
                self.dir.display()
            );
        }

        let appender = tracing_appender::rolling::daily(&self.dir, &self.prefix);
        Ok(tracing_appender::non_blocking(appender))
    }

    /// Delete rolled files of this target not modified for `days` days.
    fn remove_expired(&self, days: u64) -> usize {
        let Some(cutoff) = SystemTime::now().checked_sub(Duration::from_secs(days * 24 * 60 * 60))
        else {
            return 0;
        };
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return 0;
        };
        let prefix = self.prefix.to_string_lossy();

        entries
            .flatten()
            .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_file()))
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(prefix.as_ref()))
            .filter(|entry| {
                entry
                    .metadata()
                    .and_then(|metadata| metadata.modified())
                    .is_ok_and(|modified| modified < cutoff)
            })
            .filter(|entry| fs::remove_file(entry.path()).is_ok())
            .count()
    }
}

fn default_log_dir() -> PathBuf {
    let state_home = std::env::var_os("XDG_STATE_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local/state")))
        .unwrap_or_else(|| PathBuf::from("/tmp"));
    state_home.join("partstage").join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn explicit_file_sets_directory_and_prefix() {
        let target = LogTarget::resolve(
            Some(OsStr::new("/var/log/partstage/run.log")),
            Some(OsStr::new("/ignored")),
        );
        assert_eq!(target.dir, PathBuf::from("/var/log/partstage"));
        assert_eq!(target.prefix, OsString::from("run.log"));
    }

    #[test]
    fn explicit_directory_keeps_the_default_prefix() {
        let target = LogTarget::resolve(None, Some(OsStr::new("/srv/logs")));
        assert_eq!(target.dir, PathBuf::from("/srv/logs"));
        assert_eq!(target.prefix, OsString::from(LOG_PREFIX));
    }

    #[test]
    fn bare_file_name_lands_in_the_default_directory() {
        let target = LogTarget::resolve(Some(OsStr::new("custom.log")), None);
        assert_eq!(target.dir, default_log_dir());
        assert_eq!(target.prefix, OsString::from("custom.log"));
    }

    #[test]
    fn missing_directory_expires_nothing() {
        let target = LogTarget::resolve(None, Some(OsStr::new("/nonexistent/partstage/logs")));
        assert_eq!(target.remove_expired(KEEP_DAYS), 0);
    }

    #[test]
    fn rust_log_overrides_the_configured_level() {
        let filter = env_filter(Some("debug"), LoggingLevel::Info);
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));
    }

    #[test]
    fn configured_level_applies_without_rust_log() {
        let filter = env_filter(None, LoggingLevel::Trace);
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::TRACE));

        let filter = env_filter(None, LoggingLevel::Info);
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::INFO));
    }
}
