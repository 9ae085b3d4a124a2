use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use time::macros::format_description;
use time::UtcOffset;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{self, fmt, prelude::*};

const LOG_RETENTION_DAYS: u64 = 7;

/// Get the log directory path in the user-specific OS cache directory
/// - Linux: ~/.cache/irwalk/
/// - macOS: ~/Library/Caches/irwalk/
/// - Windows: %LOCALAPPDATA%\irwalk\
fn get_log_dir() -> io::Result<PathBuf> {
    let mut log_dir = dirs::cache_dir()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Unable to determine user cache directory"))?;
    log_dir.push("irwalk");

    if !log_dir.exists() {
        fs::create_dir_all(&log_dir)?;
    }

    Ok(log_dir)
}

/// Remove session logs older than LOG_RETENTION_DAYS
fn cleanup_old_logs(log_dir: &Path, retention: std::time::Duration) -> io::Result<()> {
    let now = std::time::SystemTime::now();

    for entry in fs::read_dir(log_dir)?.flatten() {
        let Ok(metadata) = entry.metadata() else { continue };
        if !metadata.is_file() {
            continue;
        }
        let is_session_log = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with("session-") && name.ends_with(".log"));
        if !is_session_log {
            continue;
        }
        let expired = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age > retention);
        if expired {
            if let Err(e) = fs::remove_file(entry.path()) {
                eprintln!("Failed to remove old log file {:?}: {}", entry.path(), e);
            }
        }
    }

    Ok(())
}

/// Initialize logger with stderr and optional session file output.
/// Returns a WorkerGuard that must be kept alive for the duration of the program.
///
/// # Arguments
/// * `no_color` - Disable ANSI colors in stderr output
/// * `log_level` - Override log level (otherwise uses RUST_LOG or defaults to "info")
/// * `enable_file_logging` - Also write a DEBUG-level session log to the cache directory (disable for tests)
pub fn init_logger(no_color: bool, log_level: Option<&str>, enable_file_logging: bool) -> io::Result<WorkerGuard> {
    let timer = fmt::time::OffsetTime::new(
        UtcOffset::UTC,
        format_description!("[[[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z]"),
    );

    let stderr_filter = match log_level {
        Some(level) => tracing_subscriber::EnvFilter::new(level),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    };

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_timer(timer.clone())
        .with_ansi(!no_color)
        .with_filter(stderr_filter);

    if enable_file_logging {
        let log_dir = get_log_dir()?;
        cleanup_old_logs(&log_dir, std::time::Duration::from_secs(LOG_RETENTION_DAYS * 24 * 60 * 60))?;

        let timestamp = time::OffsetDateTime::now_utc()
            .format(format_description!("[year][month][day]-[hour][minute][second]"))
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let log_path = log_dir.join(format!("session-{}-{}.log", timestamp, std::process::id()));

        let file = fs::OpenOptions::new().create(true).append(true).open(&log_path)?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_timer(timer)
            .with_ansi(false)
            .with_filter(tracing_subscriber::EnvFilter::new("debug"));

        let result = tracing_subscriber::registry()
            .with(stderr_layer)
            .with(file_layer)
            .try_init();
        eprintln!("Logging to file: {:?}", log_path);
        already_set_is_ok(result).map(|()| guard)
    } else {
        let (_, guard) = tracing_appender::non_blocking(std::io::sink());
        let result = tracing_subscriber::registry().with(stderr_layer).try_init();
        already_set_is_ok(result).map(|()| guard)
    }
}

/// Ignore errors due to the subscriber already being set (repeated init in tests)
fn already_set_is_ok(result: Result<(), tracing_subscriber::util::TryInitError>) -> io::Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("already been set") || e.to_string().contains("SetLoggerError") => Ok(()),
        Err(e) => Err(io::Error::new(io::ErrorKind::Other, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_removes_only_expired_session_logs() {
        let dir = tempfile::tempdir().unwrap();
        let session = dir.path().join("session-20240101-000000-1.log");
        let other = dir.path().join("notes.log");
        fs::write(&session, "old").unwrap();
        fs::write(&other, "keep").unwrap();

        cleanup_old_logs(dir.path(), std::time::Duration::from_secs(3600)).unwrap();
        assert!(session.exists());

        cleanup_old_logs(dir.path(), std::time::Duration::ZERO).unwrap();
        assert!(!session.exists());
        assert!(other.exists());
    }

    #[test]
    fn test_repeated_init_is_tolerated() {
        let _first = init_logger(true, Some("warn"), false).unwrap();
        let _second = init_logger(true, Some("warn"), false).unwrap();
    }
}
