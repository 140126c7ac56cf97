//! Lock holder for Capacitor.
//!
//! This background process watches an agent process and releases its project
//! lock when the process exits.
//!
//! ## Lifecycle
//!
//! 1. Spawned by `handle` when SessionStart/UserPromptSubmit claims a lock
//! 2. Polls the agent PID once a second
//! 3. Exits early if the lock is taken over or removed by someone else
//! 4. When the PID exits: release the lock (pid-checked, so a newer holder is safe)

use std::path::Path;
use std::thread;
use std::time::Duration;

use hud_core::state::{FsLockStore, LockStore, ProcessProbe, SystemProbe};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolderExit {
    /// The agent exited and we removed its lock.
    Released,
    /// Another process owns the lock now.
    TakenOver,
    /// The lock disappeared (SessionEnd or manual cleanup).
    Gone,
}

pub fn run(session_id: &str, cwd: &str, pid: u32, lock_dir: &Path) {
    let store = FsLockStore::new(lock_dir.to_path_buf());
    let exit = watch(&store, &SystemProbe, session_id, cwd, pid, POLL_INTERVAL);
    tracing::info!(session = %session_id, path = %cwd, pid, exit = ?exit, "Lock holder exiting");
}

pub fn watch(
    store: &dyn LockStore,
    probe: &dyn ProcessProbe,
    session_id: &str,
    cwd: &str,
    pid: u32,
    poll: Duration,
) -> HolderExit {
    while probe.is_alive(pid) {
        match store.get(cwd) {
            Ok(Some(lock)) if lock.holder_pid != pid || lock.session_id != session_id => {
                tracing::debug!(
                    path = %cwd,
                    holder = lock.holder_pid,
                    was = pid,
                    "Lock taken over"
                );
                return HolderExit::TakenOver;
            }
            Ok(Some(_)) => {}
            Ok(None) => return HolderExit::Gone,
            // Transient; try again next tick.
            Err(err) => tracing::warn!(path = %cwd, error = %err, "Lock unreadable"),
        }
        thread::sleep(poll);
    }

    match store.release(cwd, pid) {
        Ok(true) => HolderExit::Released,
        Ok(false) => HolderExit::Gone,
        Err(err) => {
            tracing::warn!(path = %cwd, error = %err, "Failed to release lock");
            HolderExit::Gone
        }
    }
}
