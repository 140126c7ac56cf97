//! Serialized state types used by the hook/state pipeline.
//!
//! Timestamps in session records are kept as the strings the writer produced.
//! Writers are independent processes with their own clocks and bugs, so parsing
//! happens at read time and an unparseable value ranks below any parseable one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::AgentType;
use crate::types::SessionState;

// -----------------------------------------------------------------------------
// Canonical hook→state mapping (implemented in transition.rs)
//
// SessionStart                -> ready
// UserPromptSubmit            -> working
// PreToolUse                  -> working
// PostToolUse                 -> working
// PermissionRequest           -> waiting
// Notification idle_prompt    -> ready
// PreCompact                  -> compacting
// Stop (stop_hook_active=true) -> no state change
// Stop (otherwise)            -> ready
// SessionEnd                  -> remove session record
// -----------------------------------------------------------------------------

/// Latest state reported for one (path, agent) pair. Overwritten in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub path: String,
    pub agent_type: AgentType,
    pub state: SessionState,
    pub session_id: String,
    #[serde(default)]
    pub working_on: Option<String>,
    pub state_changed_at: String,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub thinking: Option<bool>,
    #[serde(default)]
    pub thinking_updated_at: Option<String>,
    #[serde(default)]
    pub context_updated_at: Option<String>,
    /// Agent process that produced the record, when the writer knows it.
    #[serde(default)]
    pub pid: Option<u32>,
}

impl SessionRecord {
    pub fn new(
        path: &str,
        agent_type: AgentType,
        session_id: &str,
        state: SessionState,
        now: DateTime<Utc>,
    ) -> Self {
        let stamp = now.to_rfc3339();
        Self {
            path: path.to_string(),
            agent_type,
            state,
            session_id: session_id.to_string(),
            working_on: None,
            state_changed_at: stamp.clone(),
            updated_at: Some(stamp),
            thinking: None,
            thinking_updated_at: None,
            context_updated_at: None,
            pid: None,
        }
    }

    pub fn state_changed(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.state_changed_at)
    }

    /// Recency used to pick between competing records: the context-update
    /// timestamp when present and parseable, else the state-change timestamp.
    pub fn freshness(&self) -> Option<DateTime<Utc>> {
        self.context_updated_at
            .as_deref()
            .and_then(parse_timestamp)
            .or_else(|| self.state_changed())
    }

    /// Timestamp the thinking flag is judged against.
    pub fn thinking_at(&self) -> Option<DateTime<Utc>> {
        self.thinking_updated_at
            .as_deref()
            .and_then(parse_timestamp)
            .or_else(|| self.freshness())
    }
}

/// Exclusive ownership marker for one project path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    pub path_hash: String,
    pub path: String,
    #[serde(alias = "pid")]
    pub holder_pid: u32,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff_from: Option<u32>,
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
