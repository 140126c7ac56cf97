//! Claude Code adapter backed by the session record store.
//!
//! hud-hook writes one record per (path, agent) under `~/.capacitor/records/`;
//! this adapter reads the Claude ones back. Lock liveness is not consulted here;
//! that is the reconciler's job.

use std::time::SystemTime;

use crate::state::{relate, PathRelation, SessionRecord, SessionRecordStore};
use crate::storage::StorageConfig;

use super::types::{AdapterError, AgentSession, AgentType};
use super::AgentAdapter;

pub struct ClaudeAdapter {
    storage: StorageConfig,
}

impl ClaudeAdapter {
    pub fn new() -> Self {
        Self {
            storage: StorageConfig::default(),
        }
    }

    /// Creates an adapter with custom storage configuration.
    /// Used for testing with isolated directories.
    pub fn with_storage(storage: StorageConfig) -> Self {
        Self { storage }
    }

    fn store(&self) -> SessionRecordStore {
        SessionRecordStore::new(self.storage.records_dir())
    }

    fn claude_records(&self) -> Result<Vec<SessionRecord>, AdapterError> {
        let records = self.store().load_all()?;
        Ok(records
            .into_iter()
            .filter(|r| r.agent_type == AgentType::Claude)
            .collect())
    }

    fn to_session(&self, record: SessionRecord) -> AgentSession {
        AgentSession {
            agent_type: AgentType::Claude,
            agent_name: self.display_name().to_string(),
            state: record.state,
            session_id: Some(record.session_id),
            cwd: record.path,
            working_on: record.working_on,
            state_changed_at: Some(record.state_changed_at),
            context_updated_at: record.context_updated_at,
            thinking: record.thinking,
            thinking_updated_at: record.thinking_updated_at,
        }
    }
}

impl Default for ClaudeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentAdapter for ClaudeAdapter {
    fn id(&self) -> &'static str {
        "claude"
    }

    fn display_name(&self) -> &'static str {
        "Claude Code"
    }

    fn is_installed(&self) -> bool {
        // The hook has written at least once.
        self.storage.records_dir().is_dir()
    }

    fn initialize(&self) -> Result<(), AdapterError> {
        let dir = self.storage.records_dir();
        if dir.exists() && !dir.is_dir() {
            return Err(AdapterError::InitFailed {
                reason: format!("{} is not a directory", dir.display()),
            });
        }
        Ok(())
    }

    /// Freshest record at or below `project_path`.
    fn detect_session(&self, project_path: &str) -> Result<Option<AgentSession>, AdapterError> {
        let mut best: Option<SessionRecord> = None;
        for record in self.claude_records()? {
            if !matches!(
                relate(&record.path, project_path),
                PathRelation::Exact | PathRelation::Descendant
            ) {
                continue;
            }
            let fresher = match &best {
                Some(current) => record.freshness() > current.freshness(),
                None => true,
            };
            if fresher {
                best = Some(record);
            }
        }
        Ok(best.map(|record| self.to_session(record)))
    }

    fn all_sessions(&self) -> Result<Vec<AgentSession>, AdapterError> {
        Ok(self
            .claude_records()?
            .into_iter()
            .map(|record| self.to_session(record))
            .collect())
    }

    /// Records are replaced by rename, which bumps the directory mtime.
    fn state_mtime(&self) -> Option<SystemTime> {
        std::fs::metadata(self.storage.records_dir())
            .ok()?
            .modified()
            .ok()
    }
}
