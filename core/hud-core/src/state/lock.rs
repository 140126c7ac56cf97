//! Lock store: exclusive per-project ownership markers.
//!
//! Hook processes acquire a lock for the project they are working in; the engine
//! only reads them. Locks are the one coordination primitive between processes
//! that otherwise share nothing.
//!
//! # Layout
//!
//! Location: `~/.capacitor/sessions/{hash}.lock` where `{hash}` is MD5 of the
//! normalized project path, so exactly one lock entry can exist per path.
//!
//! ```json
//! { "path_hash": "…", "path": "/repo", "holder_pid": 100, "session_id": "abc",
//!   "created_at": "2026-01-01T00:00:00Z", "handoff_from": 42 }
//! ```
//!
//! # Atomicity
//!
//! Every write goes to a temp file in the lock directory and is moved into place:
//! `persist_noclobber` for create-if-absent, `persist` (rename) for takeover. A
//! reader never sees a half-written lock, and concurrent acquirers each leave a
//! complete lock behind; the last rename wins. A lock whose holder is dead is
//! replaced by a fresh one rather than taken over. Release renames the entry
//! aside and re-checks the holder before deleting it.
//!
//! # Liveness
//!
//! A lock is live iff its holder pid exists. Age is irrelevant: a week-old lock
//! with a running holder is live, a second-old lock with a dead holder is not.

use std::collections::HashSet;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use fs_err as fs;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::path_utils::normalize_path_for_matching;
use super::types::Lock;
use crate::error::{HudError, Result};

/// Answers "does this pid exist right now?".
pub trait ProcessProbe: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Liveness via `kill(pid, 0)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl ProcessProbe for SystemProbe {
    fn is_alive(&self, pid: u32) -> bool {
        is_pid_alive(pid)
    }
}

/// A probe with an explicit set of live pids. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct PidSetProbe {
    alive: Mutex<HashSet<u32>>,
}

impl PidSetProbe {
    pub fn new(alive: impl IntoIterator<Item = u32>) -> Self {
        Self {
            alive: Mutex::new(alive.into_iter().collect()),
        }
    }

    pub fn set_alive(&self, pid: u32, alive: bool) {
        let mut set = self.alive.lock().unwrap_or_else(|p| p.into_inner());
        if alive {
            set.insert(pid);
        } else {
            set.remove(&pid);
        }
    }
}

impl ProcessProbe for PidSetProbe {
    fn is_alive(&self, pid: u32) -> bool {
        self.alive
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(&pid)
    }
}

pub fn is_pid_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    #[cfg(unix)]
    {
        // SAFETY: signal 0 performs error checking only; nothing is delivered.
        if unsafe { libc::kill(raw, 0) } == 0 {
            return true;
        }
        // EPERM: the process exists but belongs to someone else.
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
    #[cfg(not(unix))]
    {
        false
    }
}

/// Computes the lock key for a project path.
pub fn compute_lock_hash(path: &str) -> String {
    let normalized = normalize_path_for_matching(path);
    format!("{:x}", md5::compute(normalized))
}

/// Ownership operations. The engine depends on this trait, not on the filesystem
/// layout, so a different transport can stand in without touching reconciliation.
pub trait LockStore: Send + Sync {
    /// Creates the lock, or takes it over. Most recent caller wins; re-acquiring
    /// with the same pid and session is a no-op that returns the current lock.
    fn acquire(&self, path: &str, pid: u32, session_id: &str) -> Result<Lock>;

    /// Removes the lock only when `pid` is the recorded holder. Returns whether
    /// a lock was removed.
    fn release(&self, path: &str, pid: u32) -> Result<bool>;

    /// The lock for exactly this path, live or not. Corrupt entries read as `None`.
    fn get(&self, path: &str) -> Result<Option<Lock>>;

    /// Every readable lock, sorted by path.
    fn all(&self) -> Result<Vec<Lock>>;

    fn is_live(&self, lock: &Lock) -> bool;

    fn live_locks(&self) -> Result<Vec<Lock>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|lock| self.is_live(lock))
            .collect())
    }
}

/// Lock store backed by one JSON file per path hash.
pub struct FsLockStore {
    base: PathBuf,
    probe: Arc<dyn ProcessProbe>,
}

impl FsLockStore {
    pub fn new(base: PathBuf) -> Self {
        Self::with_probe(base, Arc::new(SystemProbe))
    }

    pub fn with_probe(base: PathBuf, probe: Arc<dyn ProcessProbe>) -> Self {
        Self { base, probe }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Path of the lock entry for a project (whether or not it exists).
    pub fn lock_file_path(&self, project_path: &str) -> PathBuf {
        self.base
            .join(format!("{}.lock", compute_lock_hash(project_path)))
    }

    fn ensure_base(&self) -> Result<()> {
        fs::create_dir_all(&self.base)
            .map_err(|e| HudError::io("creating lock directory", e))
    }

    fn read_lock_file(file: &Path) -> Result<Option<Lock>> {
        let content = match fs::read_to_string(file) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(HudError::io("reading lock", err)),
        };
        match serde_json::from_str::<Lock>(&content) {
            Ok(lock) => Ok(Some(lock)),
            Err(err) => {
                warn!(path = %file.display(), error = %err, "Corrupt lock treated as absent");
                Ok(None)
            }
        }
    }

    /// Writes `lock` atomically. With `clobber == false`, returns `Ok(false)` when
    /// an entry already exists instead of replacing it.
    fn write_lock(&self, lock: &Lock, clobber: bool) -> Result<bool> {
        let target = self.base.join(format!("{}.lock", lock.path_hash));
        let content = serde_json::to_vec_pretty(lock)
            .map_err(|e| HudError::json("serializing lock", e))?;

        let mut temp =
            NamedTempFile::new_in(&self.base).map_err(|e| HudError::io("creating lock temp", e))?;
        temp.write_all(&content)
            .and_then(|_| temp.flush())
            .map_err(|e| HudError::io("writing lock temp", e))?;

        let persisted = if clobber {
            temp.persist(&target).map(|_| ())
        } else {
            temp.persist_noclobber(&target).map(|_| ())
        };

        match persisted {
            Ok(()) => Ok(true),
            Err(err) if !clobber && err.error.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(HudError::io("persisting lock", err.error)),
        }
    }

    /// Moves the entry aside, then deletes it only if `pid` still holds it. A
    /// takeover that landed after the caller's read is put back.
    fn remove_if_holder(&self, target: &Path, pid: u32) -> Result<bool> {
        let parked = target.with_extension(format!("lock.release-{pid}"));
        match fs::rename(target, &parked) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(HudError::io("parking lock", err)),
        }

        match Self::read_lock_file(&parked) {
            Ok(Some(lock)) if lock.holder_pid == pid => {
                fs::remove_file(&parked).map_err(|e| HudError::io("removing lock", e))?;
                debug!(path = %lock.path, pid, "Lock released");
                Ok(true)
            }
            read => {
                // Never clobber an even newer lock that arrived meanwhile.
                let restored = match fs::hard_link(&parked, target) {
                    Ok(()) => Ok(()),
                    Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(()),
                    Err(err) => Err(HudError::io("restoring lock", err)),
                };
                if let Err(err) = fs::remove_file(&parked) {
                    warn!(path = %parked.display(), error = %err, "Parked lock left behind");
                }
                restored?;
                if let Ok(Some(lock)) = &read {
                    debug!(
                        path = %lock.path,
                        pid,
                        holder = lock.holder_pid,
                        "Release raced a takeover, lock restored"
                    );
                }
                read.map(|_| false)
            }
        }
    }
}

impl LockStore for FsLockStore {
    fn acquire(&self, path: &str, pid: u32, session_id: &str) -> Result<Lock> {
        self.ensure_base()?;
        let normalized = normalize_path_for_matching(path);
        let fresh = Lock {
            path_hash: compute_lock_hash(&normalized),
            path: normalized,
            holder_pid: pid,
            session_id: session_id.to_string(),
            created_at: Utc::now(),
            handoff_from: None,
        };

        if self.write_lock(&fresh, false)? {
            debug!(path = %fresh.path, pid, session = %session_id, "Lock created");
            return Ok(fresh);
        }

        let target = self.base.join(format!("{}.lock", fresh.path_hash));
        match Self::read_lock_file(&target)? {
            Some(current) if current.holder_pid == pid && current.session_id == session_id => {
                Ok(current)
            }
            Some(current) if !self.is_live(&current) => {
                self.write_lock(&fresh, true)?;
                debug!(
                    path = %fresh.path,
                    pid,
                    dead_pid = current.holder_pid,
                    "Replaced lock of dead holder"
                );
                Ok(fresh)
            }
            Some(current) => {
                let lock = Lock {
                    created_at: current.created_at,
                    handoff_from: (current.holder_pid != pid).then_some(current.holder_pid),
                    ..fresh
                };
                self.write_lock(&lock, true)?;
                info!(
                    path = %lock.path,
                    pid,
                    previous_pid = current.holder_pid,
                    previous_session = %current.session_id,
                    "Lock taken over"
                );
                Ok(lock)
            }
            None => {
                // Vanished between our create attempt and the read, or corrupt.
                self.write_lock(&fresh, true)?;
                Ok(fresh)
            }
        }
    }

    fn release(&self, path: &str, pid: u32) -> Result<bool> {
        let target = self.lock_file_path(path);
        match Self::read_lock_file(&target)? {
            Some(lock) if lock.holder_pid == pid => self.remove_if_holder(&target, pid),
            Some(lock) => {
                debug!(
                    path = %lock.path,
                    pid,
                    holder = lock.holder_pid,
                    "Release ignored, lock held by another process"
                );
                Ok(false)
            }
            None => Ok(false),
        }
    }

    fn get(&self, path: &str) -> Result<Option<Lock>> {
        Self::read_lock_file(&self.lock_file_path(path))
    }

    fn all(&self) -> Result<Vec<Lock>> {
        let entries = match fs::read_dir(&self.base) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(HudError::io("listing locks", err)),
        };

        let mut locks = Vec::new();
        for entry in entries.flatten() {
            let file = entry.path();
            if !file.extension().is_some_and(|e| e == "lock") || !file.is_file() {
                continue;
            }
            match Self::read_lock_file(&file) {
                Ok(Some(lock)) => locks.push(lock),
                Ok(None) => {}
                Err(err) => warn!(path = %file.display(), error = %err, "Skipping unreadable lock"),
            }
        }
        locks.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(locks)
    }

    fn is_live(&self, lock: &Lock) -> bool {
        self.probe.is_alive(lock.holder_pid)
    }
}
