//! Thinking flag updates.
//!
//! The agent's status line calls `hud-hook thinking --on|--off` while a turn is in
//! flight. The flag rides on the existing session record; the reconciler treats a
//! fresh `thinking: true` as a sign of life.

use std::path::Path;

use chrono::{DateTime, Utc};
use hud_core::state::SessionRecordStore;
use hud_core::{AgentType, StorageConfig};

use crate::error::HookError;

pub fn run(cwd: Option<&str>, on: bool) -> Result<(), HookError> {
    let cwd = match cwd {
        Some(cwd) => cwd.to_string(),
        None => std::env::current_dir()?.to_string_lossy().into_owned(),
    };
    let storage = StorageConfig::default();
    let updated = set_thinking(&storage.records_dir(), &cwd, on, Utc::now())?;
    if !updated {
        tracing::debug!(cwd = %cwd, "No session record; thinking flag skipped");
    }
    Ok(())
}

fn set_thinking(
    records_dir: &Path,
    cwd: &str,
    on: bool,
    now: DateTime<Utc>,
) -> Result<bool, HookError> {
    let store = SessionRecordStore::new(records_dir.to_path_buf());
    let record = store.set_thinking(cwd, AgentType::Claude, on, now)?;
    Ok(record.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hud_core::SessionState;
    use tempfile::tempdir;

    #[test]
    fn test_sets_flag_on_existing_record() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("records");
        let store = SessionRecordStore::new(dir.clone());
        let now = Utc::now();
        store
            .update_state("/code/app", AgentType::Claude, "s1", SessionState::Working, now)
            .unwrap();

        assert!(set_thinking(&dir, "/code/app", true, now).unwrap());

        let record = store.read("/code/app", AgentType::Claude).unwrap().unwrap();
        assert_eq!(record.thinking, Some(true));
        assert!(record.thinking_updated_at.is_some());
    }

    #[test]
    fn test_missing_record_is_not_created() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("records");

        assert!(!set_thinking(&dir, "/code/app", true, Utc::now()).unwrap());
        assert!(SessionRecordStore::new(dir)
            .read("/code/app", AgentType::Claude)
            .unwrap()
            .is_none());
    }
}
