//! Shared agent DTOs.
//! Prefer additive changes; these shapes are read from disk and sent to clients.

use serde::{Deserialize, Serialize};

use crate::state::SessionRecord;
use crate::types::SessionState;

/// Known agent families. Unknown ids on disk deserialize as `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Claude,
    Codex,
    Aider,
    Amp,
    OpenCode,
    Droid,
    #[serde(other)]
    Other,
}

impl AgentType {
    pub fn id(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Aider => "aider",
            Self::Amp => "amp",
            Self::OpenCode => "opencode",
            Self::Droid => "droid",
            Self::Other => "other",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Claude => "Claude Code",
            Self::Codex => "OpenAI Codex",
            Self::Aider => "Aider",
            Self::Amp => "Amp",
            Self::OpenCode => "OpenCode",
            Self::Droid => "Droid",
            Self::Other => "Other",
        }
    }

    pub fn from_id(id: &str) -> Self {
        match id {
            "claude" => Self::Claude,
            "codex" => Self::Codex,
            "aider" => Self::Aider,
            "amp" => Self::Amp,
            "opencode" => Self::OpenCode,
            "droid" => Self::Droid,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// A detected agent session.
///
/// NOTE: The composite key is (agent_type, session_id). Session IDs are only
/// unique within an agent type, not globally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSession {
    pub agent_type: AgentType,
    pub agent_name: String,
    pub state: SessionState,
    #[serde(default)]
    pub session_id: Option<String>,
    pub cwd: String,
    #[serde(default)]
    pub working_on: Option<String>,
    #[serde(default)]
    pub state_changed_at: Option<String>,
    #[serde(default)]
    pub context_updated_at: Option<String>,
    #[serde(default)]
    pub thinking: Option<bool>,
    #[serde(default)]
    pub thinking_updated_at: Option<String>,
}

impl AgentSession {
    /// The record form the reconciler consumes. A missing state-change time is
    /// left blank, which ranks below every parseable timestamp.
    pub fn to_record(&self) -> SessionRecord {
        SessionRecord {
            path: self.cwd.clone(),
            agent_type: self.agent_type,
            state: self.state,
            session_id: self.session_id.clone().unwrap_or_default(),
            working_on: self.working_on.clone(),
            state_changed_at: self.state_changed_at.clone().unwrap_or_default(),
            updated_at: None,
            thinking: self.thinking,
            thinking_updated_at: self.thinking_updated_at.clone(),
            context_updated_at: self.context_updated_at.clone(),
            pid: None,
        }
    }
}

/// User preferences for which agents appear and in what order. Owned by the app.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default, alias = "disabledAgents", alias = "disabled")]
    pub disabled_agents: Vec<String>,
    #[serde(default, alias = "displayOrder", alias = "agent_order")]
    pub display_order: Vec<String>,
}

impl AgentConfig {
    pub fn is_disabled(&self, id: &str) -> bool {
        self.disabled_agents.iter().any(|d| d == id)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AdapterError {
    #[error("Corrupted state at {path}: {reason}")]
    CorruptedState { path: String, reason: String },

    #[error("Permission denied: {path}")]
    PermissionDenied { path: String },

    #[error("IO error: {message}")]
    IoError { message: String },

    #[error("Initialization failed: {reason}")]
    InitFailed { reason: String },
}

impl From<crate::error::HudError> for AdapterError {
    fn from(err: crate::error::HudError) -> Self {
        AdapterError::IoError {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_type_id_round_trips() {
        for agent in [
            AgentType::Claude,
            AgentType::Codex,
            AgentType::Aider,
            AgentType::Amp,
            AgentType::OpenCode,
            AgentType::Droid,
        ] {
            assert_eq!(AgentType::from_id(agent.id()), agent);
        }
        assert_eq!(AgentType::from_id("mystery"), AgentType::Other);
    }

    #[test]
    fn test_agent_type_serde_matches_id() {
        assert_eq!(
            serde_json::to_string(&AgentType::OpenCode).unwrap(),
            "\"opencode\""
        );
        let parsed: AgentType = serde_json::from_str("\"gemini\"").unwrap();
        assert_eq!(parsed, AgentType::Other);
    }

    #[test]
    fn test_agent_type_display_name() {
        assert_eq!(AgentType::Claude.display_name(), "Claude Code");
        assert_eq!(AgentType::Codex.display_name(), "OpenAI Codex");
    }

    #[test]
    fn test_adapter_error_display() {
        let err = AdapterError::CorruptedState {
            path: "/test".to_string(),
            reason: "invalid json".to_string(),
        };
        assert!(err.to_string().contains("Corrupted state"));
        assert!(err.to_string().contains("/test"));
    }

    #[test]
    fn test_agent_config_accepts_camel_case() {
        let config: AgentConfig =
            serde_json::from_str(r#"{"disabledAgents":["amp"],"displayOrder":["claude"]}"#)
                .unwrap();
        assert!(config.is_disabled("amp"));
        assert!(!config.is_disabled("claude"));
        assert_eq!(config.display_order, vec!["claude".to_string()]);
    }
}
