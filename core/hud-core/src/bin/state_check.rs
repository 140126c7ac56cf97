//! Debug utility for inspecting lock/record health in local environments.
//!
//! Prints every lock (with holder liveness), every session record, and one
//! refreshed engine snapshot as JSON. `--watch` keeps refreshing.

use std::thread;
use std::time::Duration;

use clap::Parser;
use hud_core::state::{is_pid_alive, FsLockStore, LockStore, SessionRecordStore};
use hud_core::storage::StorageConfig;
use hud_core::HudEngine;
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "state-check")]
#[command(about = "Dump Capacitor locks, records and reconciled state")]
struct Cli {
    /// Storage root (defaults to ~/.capacitor)
    #[arg(long)]
    root: Option<std::path::PathBuf>,

    /// Keep refreshing on a fixed cadence
    #[arg(long)]
    watch: bool,

    /// Refresh cadence in milliseconds
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,
}

fn init_logging() {
    let filter = if std::env::var("CAPACITOR_DEBUG_LOG").is_ok_and(|v| v == "1") {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_logging();
    let cli = Cli::parse();
    let storage = cli
        .root
        .map(StorageConfig::with_root)
        .unwrap_or_default();

    if let Err(err) = run(storage, cli.watch, Duration::from_millis(cli.interval_ms)) {
        tracing::error!(error = %err, "state-check failed");
        std::process::exit(1);
    }
}

fn run(storage: StorageConfig, watch: bool, interval: Duration) -> hud_core::Result<()> {
    let locks = FsLockStore::new(storage.sessions_dir());
    let lock_report: Vec<_> = locks
        .all()?
        .into_iter()
        .map(|lock| {
            let alive = is_pid_alive(lock.holder_pid);
            json!({ "lock": lock, "alive": alive })
        })
        .collect();
    let records = SessionRecordStore::new(storage.records_dir()).load_all()?;

    let mut engine = HudEngine::with_storage(storage)?;
    let snapshot = engine.refresh()?;

    print_json(&json!({
        "locks": lock_report,
        "records": records,
        "snapshot": snapshot,
    }));

    while watch {
        thread::sleep(interval);
        match engine.refresh() {
            Ok(snapshot) => print_json(&json!({ "snapshot": snapshot })),
            Err(err) => tracing::warn!(error = %err, "Refresh failed; previous snapshot kept"),
        }
    }

    engine.shutdown();
    Ok(())
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(err) => tracing::error!(error = %err, "Failed to render JSON"),
    }
}
