//! Maps agent hook events to record transitions.
//! Conservative rules avoid false positives when events are ambiguous.

use super::hook::HookEvent;
use crate::types::SessionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Write this state.
    Set(SessionState),
    /// Leave the record as it is.
    Keep,
    /// The session is gone; delete its record and release its lock.
    Remove,
}

impl Transition {
    /// Whether the writer should (re)acquire the project lock for this event.
    pub fn claims_lock(event: &HookEvent) -> bool {
        matches!(event, HookEvent::SessionStart | HookEvent::UserPromptSubmit)
    }
}

pub fn next_state(event: &HookEvent) -> Transition {
    match event {
        HookEvent::SessionStart => Transition::Set(SessionState::Ready),
        HookEvent::UserPromptSubmit => Transition::Set(SessionState::Working),
        HookEvent::PreToolUse { .. } | HookEvent::PostToolUse { .. } => {
            Transition::Set(SessionState::Working)
        }
        HookEvent::PermissionRequest => Transition::Set(SessionState::Waiting),
        HookEvent::PreCompact => Transition::Set(SessionState::Compacting),
        HookEvent::Notification { notification_type } if notification_type == "idle_prompt" => {
            Transition::Set(SessionState::Ready)
        }
        HookEvent::Notification { .. } => Transition::Keep,
        HookEvent::Stop {
            stop_hook_active: true,
        } => Transition::Keep,
        HookEvent::Stop { .. } => Transition::Set(SessionState::Ready),
        HookEvent::SessionEnd => Transition::Remove,
        HookEvent::Unknown { .. } => Transition::Keep,
    }
}
