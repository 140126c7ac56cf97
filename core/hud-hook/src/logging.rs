//! File logging for hud-hook.
//!
//! Hooks run inside the agent's process tree, so stdout and stderr are off
//! limits. Logs go to a daily file under `~/.capacitor/logs/` instead.
//! `RUST_LOG` controls the filter; `CAPACITOR_DEBUG_LOG=1` forces `debug`.

use fs_err as fs;
use hud_core::StorageConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Installs the subscriber. The returned guard must live until exit so buffered
/// lines are flushed. `None` means logging is off (e.g. the log dir is unwritable).
pub fn init() -> Option<WorkerGuard> {
    let log_dir = StorageConfig::default().logs_dir();
    if fs::create_dir_all(&log_dir).is_err() {
        return None;
    }

    let appender = tracing_appender::rolling::daily(&log_dir, "hud-hook.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = if std::env::var("CAPACITOR_DEBUG_LOG").is_ok_and(|v| v == "1") {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .ok()?;

    Some(guard)
}
