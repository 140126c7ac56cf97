//! Agent hook payloads as delivered on stdin.
//!
//! Only the fields that influence session state are modeled; everything else in
//! the payload is ignored by serde.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookInput {
    #[serde(default)]
    pub hook_event_name: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub notification_type: Option<String>,
    #[serde(default)]
    pub stop_hook_active: Option<bool>,
    #[serde(default)]
    pub trigger: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookEvent {
    SessionStart,
    UserPromptSubmit,
    PreToolUse { tool_name: Option<String> },
    PostToolUse { tool_name: Option<String> },
    PermissionRequest,
    PreCompact,
    Notification { notification_type: String },
    Stop { stop_hook_active: bool },
    SessionEnd,
    Unknown { event_name: String },
}

impl HookInput {
    /// `None` when the payload carries no event name at all.
    pub fn to_event(&self) -> Option<HookEvent> {
        let name = self.hook_event_name.as_deref()?;
        let event = match name {
            "SessionStart" => HookEvent::SessionStart,
            "UserPromptSubmit" => HookEvent::UserPromptSubmit,
            "PreToolUse" => HookEvent::PreToolUse {
                tool_name: self.tool_name.clone(),
            },
            "PostToolUse" => HookEvent::PostToolUse {
                tool_name: self.tool_name.clone(),
            },
            "PermissionRequest" => HookEvent::PermissionRequest,
            "PreCompact" => HookEvent::PreCompact,
            "Notification" => HookEvent::Notification {
                notification_type: self.notification_type.clone().unwrap_or_default(),
            },
            "Stop" => HookEvent::Stop {
                stop_hook_active: self.stop_hook_active.unwrap_or(false),
            },
            "SessionEnd" => HookEvent::SessionEnd,
            other => HookEvent::Unknown {
                event_name: other.to_string(),
            },
        };
        Some(event)
    }

    /// The payload's cwd, else `fallback`. Blank values count as missing.
    pub fn resolve_cwd(&self, fallback: Option<&str>) -> Option<String> {
        self.cwd
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .or(fallback.filter(|c| !c.trim().is_empty()))
            .map(str::to_string)
    }

    /// First line of the prompt, trimmed, for the "working on" label.
    pub fn prompt_summary(&self) -> Option<String> {
        let line = self.prompt.as_deref()?.lines().find(|l| !l.trim().is_empty())?;
        let line = line.trim();
        const MAX_CHARS: usize = 120;
        if line.chars().count() > MAX_CHARS {
            let cut: String = line.chars().take(MAX_CHARS).collect();
            Some(format!("{}…", cut.trim_end()))
        } else {
            Some(line.to_string())
        }
    }
}
