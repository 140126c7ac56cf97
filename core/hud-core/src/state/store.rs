//! File-backed session record persistence.
//!
//! One JSON file per (path, agent) under `~/.capacitor/records/`:
//!
//! ```text
//! records/{md5(path)}.{agent}.json
//! ```
//!
//! Hook processes for different projects never touch the same file, so concurrent
//! writers cannot lose each other's updates. A record is overwritten in place; no
//! history is kept.
//!
//! # Defensive reads
//!
//! Writers are separate processes that may crash mid-way or predate the current
//! schema. Empty or corrupt files are skipped with a warning; they never fail a
//! whole scan.
//!
//! # Atomic writes
//!
//! Temp file in the same directory + rename, so readers see either the old record
//! or the new one.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs_err as fs;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::lock::compute_lock_hash;
use super::path_utils::strip_trailing_slashes;
use super::types::SessionRecord;
use crate::agents::AgentType;
use crate::error::{HudError, Result};
use crate::types::SessionState;

pub struct SessionRecordStore {
    dir: PathBuf,
}

impl SessionRecordStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_file(&self, path: &str, agent: AgentType) -> PathBuf {
        self.dir
            .join(format!("{}.{}.json", compute_lock_hash(path), agent.id()))
    }

    pub fn read(&self, path: &str, agent: AgentType) -> Result<Option<SessionRecord>> {
        read_record_file(&self.record_file(path, agent))
    }

    pub fn write(&self, record: &SessionRecord) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| HudError::io("creating records directory", e))?;

        let target = self.record_file(&record.path, record.agent_type);
        let content = serde_json::to_vec_pretty(record)
            .map_err(|e| HudError::json("serializing session record", e))?;

        let mut temp =
            NamedTempFile::new_in(&self.dir).map_err(|e| HudError::io("creating record temp", e))?;
        temp.write_all(&content)
            .and_then(|_| temp.flush())
            .map_err(|e| HudError::io("writing record temp", e))?;
        temp.persist(&target)
            .map_err(|e| HudError::io("persisting session record", e.error))?;
        Ok(())
    }

    pub fn remove(&self, path: &str, agent: AgentType) -> Result<bool> {
        match fs::remove_file(self.record_file(path, agent)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(HudError::io("removing session record", err)),
        }
    }

    /// Every readable record, ordered by (path, agent). That order is the
    /// "first found" tie-break used during reconciliation.
    pub fn load_all(&self) -> Result<Vec<SessionRecord>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(HudError::io("listing session records", err)),
        };

        let mut records = Vec::new();
        for entry in entries.flatten() {
            let file = entry.path();
            if !file.extension().is_some_and(|e| e == "json") {
                continue;
            }
            match read_record_file(&file) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(err) => warn!(path = %file.display(), error = %err, "Skipping unreadable record"),
            }
        }

        records.sort_by(|a, b| {
            a.path
                .cmp(&b.path)
                .then_with(|| a.agent_type.cmp(&b.agent_type))
        });
        Ok(records)
    }

    /// Writes a new lifecycle state. `state_changed_at` only moves when the state
    /// actually changes, so repeated `working` events keep the original start time.
    pub fn update_state(
        &self,
        path: &str,
        agent: AgentType,
        session_id: &str,
        state: SessionState,
        now: DateTime<Utc>,
    ) -> Result<SessionRecord> {
        let stamp = now.to_rfc3339();
        let record = match self.read(path, agent)? {
            Some(mut existing) => {
                if existing.state != state || existing.session_id != session_id {
                    existing.state_changed_at = stamp.clone();
                }
                if existing.session_id != session_id {
                    existing.thinking = None;
                    existing.thinking_updated_at = None;
                    existing.working_on = None;
                }
                existing.state = state;
                existing.session_id = session_id.to_string();
                existing.updated_at = Some(stamp);
                existing
            }
            None => SessionRecord::new(&strip_trailing_slashes(path), agent, session_id, state, now),
        };

        self.write(&record)?;
        debug!(path = %record.path, agent = %agent, state = %state, "Session record updated");
        Ok(record)
    }

    /// Sets the thinking flag on an existing record. No record means no session to
    /// annotate, so nothing is written.
    pub fn set_thinking(
        &self,
        path: &str,
        agent: AgentType,
        thinking: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>> {
        let Some(mut record) = self.read(path, agent)? else {
            return Ok(None);
        };
        let stamp = now.to_rfc3339();
        record.thinking = Some(thinking);
        record.thinking_updated_at = Some(stamp.clone());
        record.updated_at = Some(stamp);
        self.write(&record)?;
        Ok(Some(record))
    }
}

fn read_record_file(file: &Path) -> Result<Option<SessionRecord>> {
    let content = match fs::read_to_string(file) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(HudError::io("reading session record", err)),
    };
    if content.trim().is_empty() {
        return Ok(None);
    }
    match serde_json::from_str::<SessionRecord>(&content) {
        Ok(record) => Ok(Some(record)),
        Err(err) => {
            warn!(path = %file.display(), error = %err, "Corrupt session record ignored");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, SessionRecordStore) {
        let temp = tempdir().unwrap();
        let store = SessionRecordStore::new(temp.path().join("records"));
        (temp, store)
    }

    #[test]
    fn test_missing_directory_loads_empty() {
        let (_temp, store) = store();
        assert!(store.load_all().unwrap().is_empty());
        assert!(store.read("/p", AgentType::Claude).unwrap().is_none());
    }

    #[test]
    fn test_update_creates_record() {
        let (_temp, store) = store();
        let now = Utc::now();
        let record = store
            .update_state("/project/", AgentType::Claude, "s1", SessionState::Working, now)
            .unwrap();
        assert_eq!(record.path, "/project");
        assert_eq!(record.state, SessionState::Working);
        assert_eq!(store.read("/project", AgentType::Claude).unwrap(), Some(record));
    }

    #[test]
    fn test_same_state_preserves_state_changed_at() {
        let (_temp, store) = store();
        let t0 = Utc::now();
        let first = store
            .update_state("/p", AgentType::Claude, "s1", SessionState::Working, t0)
            .unwrap();
        let second = store
            .update_state(
                "/p",
                AgentType::Claude,
                "s1",
                SessionState::Working,
                t0 + Duration::seconds(5),
            )
            .unwrap();
        assert_eq!(first.state_changed_at, second.state_changed_at);
        assert_ne!(first.updated_at, second.updated_at);
    }

    #[test]
    fn test_state_change_moves_state_changed_at() {
        let (_temp, store) = store();
        let t0 = Utc::now();
        store
            .update_state("/p", AgentType::Claude, "s1", SessionState::Working, t0)
            .unwrap();
        let later = t0 + Duration::seconds(5);
        let record = store
            .update_state("/p", AgentType::Claude, "s1", SessionState::Ready, later)
            .unwrap();
        assert_eq!(record.state_changed_at, later.to_rfc3339());
    }

    #[test]
    fn test_records_are_per_agent() {
        let (_temp, store) = store();
        let now = Utc::now();
        store
            .update_state("/p", AgentType::Claude, "s1", SessionState::Working, now)
            .unwrap();
        store
            .update_state("/p", AgentType::Codex, "c1", SessionState::Ready, now)
            .unwrap();
        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].agent_type, AgentType::Claude);
        assert_eq!(all[1].agent_type, AgentType::Codex);
    }

    #[test]
    fn test_corrupt_record_is_skipped() {
        let (_temp, store) = store();
        store
            .update_state("/good", AgentType::Claude, "s1", SessionState::Ready, Utc::now())
            .unwrap();
        fs::write(store.dir().join("deadbeef.claude.json"), "{ broken").unwrap();
        fs::write(store.dir().join("empty.claude.json"), "").unwrap();

        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].path, "/good");
    }

    #[test]
    fn test_remove_record() {
        let (_temp, store) = store();
        store
            .update_state("/p", AgentType::Claude, "s1", SessionState::Ready, Utc::now())
            .unwrap();
        assert!(store.remove("/p", AgentType::Claude).unwrap());
        assert!(!store.remove("/p", AgentType::Claude).unwrap());
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_set_thinking_requires_record() {
        let (_temp, store) = store();
        let now = Utc::now();
        assert!(store
            .set_thinking("/p", AgentType::Claude, true, now)
            .unwrap()
            .is_none());

        store
            .update_state("/p", AgentType::Claude, "s1", SessionState::Working, now)
            .unwrap();
        let record = store
            .set_thinking("/p", AgentType::Claude, true, now)
            .unwrap()
            .unwrap();
        assert_eq!(record.thinking, Some(true));
        assert_eq!(record.thinking_updated_at, Some(now.to_rfc3339()));
    }

    #[test]
    fn test_new_session_clears_thinking() {
        let (_temp, store) = store();
        let now = Utc::now();
        store
            .update_state("/p", AgentType::Claude, "s1", SessionState::Working, now)
            .unwrap();
        store.set_thinking("/p", AgentType::Claude, true, now).unwrap();
        let record = store
            .update_state("/p", AgentType::Claude, "s2", SessionState::Working, now)
            .unwrap();
        assert!(record.thinking.is_none());
        assert_eq!(record.session_id, "s2");
    }
}
