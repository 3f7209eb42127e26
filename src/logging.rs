//! Tracing setup shared by the server and the CLI.
//!
//! Events go to stdout and to a log file. `DOCRELAY_LOG_FILE` appends to a fixed path;
//! otherwise files land in `DOCRELAY_LOG_DIR` (default `logs/`) as `docrelay.log`, rotated
//! according to `DOCRELAY_LOG_ROTATION` (`never`, `hourly` or `daily`). The file writer is
//! non-blocking so slow disks never stall page extraction.
use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::{
    non_blocking::{NonBlocking, WorkerGuard},
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_FILTER: &str = "info,hyper=warn,reqwest=warn";
const LOG_FILE_NAME: &str = "docrelay.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

#[derive(Debug, PartialEq, Eq)]
enum LogTarget {
    File(PathBuf),
    Directory { dir: PathBuf, rotation: RotationKind },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RotationKind {
    Never,
    Hourly,
    Daily,
}

impl RotationKind {
    fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("hourly") => Self::Hourly,
            Some("daily") => Self::Daily,
            _ => Self::Never,
        }
    }

    fn into_rotation(self) -> Rotation {
        match self {
            Self::Never => Rotation::NEVER,
            Self::Hourly => Rotation::HOURLY,
            Self::Daily => Rotation::DAILY,
        }
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the default filter. Calling this twice is harmless; the second call
/// leaves the first subscriber in place.
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let stdout_layer = fmt::layer().with_target(false).compact();

    let file_layer = open_writer(resolve_target(|key| std::env::var(key).ok())).map(|writer| {
        fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
    });

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init();
}

fn resolve_target(lookup: impl Fn(&str) -> Option<String>) -> LogTarget {
    let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(path) = non_empty("DOCRELAY_LOG_FILE") {
        return LogTarget::File(PathBuf::from(path));
    }
    LogTarget::Directory {
        dir: non_empty("DOCRELAY_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("logs")),
        rotation: RotationKind::parse(non_empty("DOCRELAY_LOG_ROTATION").as_deref()),
    }
}

/// Returns `None` (after reporting on stderr) when the target cannot be opened.
fn open_writer(target: LogTarget) -> Option<NonBlocking> {
    let (writer, guard) = match target {
        LogTarget::File(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|err| eprintln!("Failed to open log file {}: {err}", path.display()))
                .ok()?;
            tracing_appender::non_blocking(file)
        }
        LogTarget::Directory { dir, rotation } => {
            let appender = RollingFileAppender::builder()
                .rotation(rotation.into_rotation())
                .filename_prefix(LOG_FILE_NAME)
                .build(&dir)
                .map_err(|err| eprintln!("Failed to set up logs in {}: {err}", dir.display()))
                .ok()?;
            tracing_appender::non_blocking(appender)
        }
    };

    let _ = LOG_GUARD.set(guard);
    Some(writer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_file_wins_over_directory() {
        let target = resolve_target(|key| match key {
            "DOCRELAY_LOG_FILE" => Some("/var/log/docrelay.log".into()),
            "DOCRELAY_LOG_DIR" => Some("/tmp/ignored".into()),
            _ => None,
        });
        assert_eq!(target, LogTarget::File(PathBuf::from("/var/log/docrelay.log")));
    }

    #[test]
    fn directory_defaults_and_rotation() {
        assert_eq!(
            resolve_target(|_| None),
            LogTarget::Directory {
                dir: PathBuf::from("logs"),
                rotation: RotationKind::Never,
            }
        );

        let target = resolve_target(|key| match key {
            "DOCRELAY_LOG_FILE" => Some("  ".into()),
            "DOCRELAY_LOG_ROTATION" => Some("Daily".into()),
            _ => None,
        });
        assert_eq!(
            target,
            LogTarget::Directory {
                dir: PathBuf::from("logs"),
                rotation: RotationKind::Daily,
            }
        );
    }
}
