//! Core types shared across all Capacitor clients.
//!
//! These types are the "lingua franca" between the engine and whatever presents
//! it (desktop app, TUI, paired device).

use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════════
// Project Types
// ═══════════════════════════════════════════════════════════════════════════════

/// A tracked project. The path is the identity.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Project {
    pub path: String,
    pub name: String,
}

impl Project {
    /// Builds a project named after the last path component.
    pub fn from_path(path: impl Into<String>) -> Self {
        let path = path.into();
        let name = std::path::Path::new(&path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.clone());
        Self { path, name }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Session State Types
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle of an agent session as shown to the user.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Working,
    Ready,
    #[default]
    Idle,
    Compacting,
    Waiting,
}

impl SessionState {
    /// Whether entering this state should draw the user's eye.
    pub fn needs_attention(&self) -> bool {
        matches!(self, Self::Ready | Self::Waiting | Self::Compacting)
    }

    /// Whether this state indicates the agent is busy.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Working | Self::Compacting)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SessionState::Working => "working",
            SessionState::Ready => "ready",
            SessionState::Idle => "idle",
            SessionState::Compacting => "compacting",
            SessionState::Waiting => "waiting",
        };
        f.write_str(label)
    }
}

/// Where a reconciled state came from.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateOrigin {
    #[default]
    Local,
    Remote,
}

/// The single externally visible state of one project for one refresh.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ReconciledState {
    pub project: Project,
    pub state: SessionState,
    pub is_locked: bool,
    pub flashing: bool,
    pub origin: StateOrigin,
    pub session_id: Option<String>,
    pub agent_type: Option<String>,
    pub working_on: Option<String>,
    pub state_changed_at: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Focus Types
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActiveSource {
    ManualOverride,
    ShellFocus,
    MostRecentAgentSession,
    #[default]
    None,
}

/// Which project is "in focus" and why.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct ActiveSelection {
    pub project: Option<Project>,
    pub source: ActiveSource,
}

/// Terminal application hosting a shell.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParentApp {
    Terminal,
    #[serde(rename = "iterm")]
    ITerm,
    Ghostty,
    Warp,
    Kitty,
    Alacritty,
    #[serde(rename = "vscode")]
    VSCode,
    #[serde(rename = "vscode_insiders")]
    VSCodeInsiders,
    Cursor,
    Zed,
    Tmux,
    #[default]
    Unknown,
}
