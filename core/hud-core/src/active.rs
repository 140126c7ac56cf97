//! Active project selection.
//!
//! Which project is "in focus" right now. The cascade, first hit wins:
//!
//! 1. Manual override, for as long as its window lasts. Once the window has
//!    elapsed the override is cleared and never looked at again.
//! 2. Shell focus: the most recently updated shell's cwd, attached to the most
//!    specific tracked project. Equally specific roots go to the one whose
//!    session changed last. A shell whose process is gone is ignored.
//! 3. The live-locked local session with the latest `state_changed_at`.
//!    Unparseable timestamps rank last; ties go to the smaller path.
//! 4. Nothing.
//!
//! The resolver keeps only the override in memory and has no other side effects.

use chrono::{DateTime, Duration, Utc};

use crate::clock::Expiring;
use crate::shell::ShellCwdState;
use crate::state::{parse_timestamp, resolve, resolve_root, ProcessProbe};
use crate::types::{ActiveSelection, ActiveSource, Project, ReconciledState, StateOrigin};

/// Signals for one selection.
pub struct ActiveInput<'a> {
    pub projects: &'a [Project],
    pub shells: &'a ShellCwdState,
    pub states: &'a [ReconciledState],
    pub probe: &'a dyn ProcessProbe,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ActiveResolver {
    manual: Option<Expiring<String>>,
}

impl ActiveResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins `project_path` for `window`, replacing any earlier override.
    pub fn set_manual_override(&mut self, project_path: &str, now: DateTime<Utc>, window: Duration) {
        self.manual = Some(Expiring::new(project_path.to_string(), now, window));
    }

    pub fn clear_manual_override(&mut self) {
        self.manual = None;
    }

    /// The live override, if any. Does not clear an expired one.
    pub fn manual_override(&self, now: DateTime<Utc>) -> Option<&str> {
        self.manual
            .as_ref()
            .and_then(|m| m.get(now))
            .map(String::as_str)
    }

    pub fn resolve(&mut self, input: &ActiveInput<'_>) -> ActiveSelection {
        if self.manual.as_ref().is_some_and(|m| m.is_expired(input.now)) {
            self.manual = None;
        }

        if let Some(path) = self.manual_override(input.now) {
            if let Some(project) = resolve_root(path, input.projects, |p| p.path.as_str()) {
                return selection(project, ActiveSource::ManualOverride);
            }
        }

        if let Some(project) = shell_focus(input) {
            return selection(project, ActiveSource::ShellFocus);
        }

        if let Some(project) = most_recent_locked(input.states) {
            return selection(project, ActiveSource::MostRecentAgentSession);
        }

        ActiveSelection::default()
    }
}

fn selection(project: &Project, source: ActiveSource) -> ActiveSelection {
    ActiveSelection {
        project: Some(project.clone()),
        source,
    }
}

fn shell_focus<'a>(input: &ActiveInput<'a>) -> Option<&'a Project> {
    let (pid, shell) = input.shells.most_recent()?;
    if !input.probe.is_alive(pid) {
        return None;
    }
    resolve(
        &shell.cwd,
        input.projects,
        |p| p.path.as_str(),
        |p| {
            input
                .states
                .iter()
                .find(|s| s.project.path == p.path)
                .and_then(last_change)
        },
    )
}

fn last_change(state: &ReconciledState) -> Option<DateTime<Utc>> {
    state.state_changed_at.as_deref().and_then(parse_timestamp)
}

fn most_recent_locked(states: &[ReconciledState]) -> Option<&Project> {
    let mut best: Option<(&ReconciledState, Option<DateTime<Utc>>)> = None;
    for state in states
        .iter()
        .filter(|s| s.is_locked && s.origin == StateOrigin::Local)
    {
        let changed = last_change(state);
        let better = match &best {
            None => true,
            Some((current, current_changed)) => match changed.cmp(current_changed) {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Less => false,
                std::cmp::Ordering::Equal => state.project.path < current.project.path,
            },
        };
        if better {
            best = Some((state, changed));
        }
    }
    best.map(|(state, _)| &state.project)
}
