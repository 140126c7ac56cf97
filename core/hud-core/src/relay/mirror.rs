//! In-memory copy of what the paired device last told us.
//!
//! Pure data: the relay worker feeds it decrypted snapshots and heartbeats, the
//! reconciler reads it. Entries are keyed by normalized project path and persist
//! across disconnects until they expire.

use std::collections::BTreeMap;

use capacitor_relay_protocol::{Heartbeat, RemoteProjectState, RemoteSnapshot, RemoteState};
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::state::normalize_path_for_matching;
use crate::types::SessionState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub state: RemoteProjectState,
    /// When we received the latest state for this project.
    pub received_at: DateTime<Utc>,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl RemoteEntry {
    /// Most recent sign of life: state update or heartbeat, whichever is later.
    pub fn last_seen(&self) -> DateTime<Utc> {
        match self.last_heartbeat {
            Some(hb) if hb > self.received_at => hb,
            _ => self.received_at,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RemoteMirror {
    entries: BTreeMap<String, RemoteEntry>,
    connected_at: Option<DateTime<Utc>>,
}

impl RemoteMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a decrypted snapshot. Projects missing from it keep their previous
    /// entry; only expiry removes entries.
    pub fn apply_snapshot(&mut self, snapshot: RemoteSnapshot, now: DateTime<Utc>) {
        for (path, state) in snapshot {
            let key = normalize_path_for_matching(&path);
            let last_heartbeat = self.entries.get(&key).and_then(|e| e.last_heartbeat);
            self.entries.insert(
                key,
                RemoteEntry {
                    state,
                    received_at: now,
                    last_heartbeat,
                },
            );
        }
    }

    /// Records a heartbeat at receipt time. Heartbeats for projects we hold no
    /// state for are dropped.
    pub fn apply_heartbeat(&mut self, heartbeat: &Heartbeat, now: DateTime<Utc>) {
        let key = normalize_path_for_matching(&heartbeat.project);
        match self.entries.get_mut(&key) {
            Some(entry) => entry.last_heartbeat = Some(now),
            None => debug!(project = %heartbeat.project, "Heartbeat for unknown remote project"),
        }
    }

    pub fn set_connected(&mut self, at: Option<DateTime<Utc>>) {
        self.connected_at = at;
    }

    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        self.connected_at
    }

    /// Drops entries with no update or heartbeat within `expiry`. Returns how many
    /// were dropped.
    pub fn expire(&mut self, now: DateTime<Utc>, expiry: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| now - entry.last_seen() < expiry);
        before - self.entries.len()
    }

    pub fn get(&self, project_path: &str) -> Option<&RemoteEntry> {
        self.entries.get(&normalize_path_for_matching(project_path))
    }

    /// Time the `Working` staleness rule is measured from: the last heartbeat,
    /// else when the connection came up, else when the state arrived.
    pub fn last_signal(&self, entry: &RemoteEntry) -> DateTime<Utc> {
        entry
            .last_heartbeat
            .or(self.connected_at)
            .unwrap_or(entry.received_at)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<RemoteState> for SessionState {
    fn from(state: RemoteState) -> Self {
        match state {
            RemoteState::Idle => SessionState::Idle,
            RemoteState::Ready => SessionState::Ready,
            RemoteState::Working => SessionState::Working,
            RemoteState::Waiting => SessionState::Waiting,
            RemoteState::Compacting => SessionState::Compacting,
        }
    }
}

impl From<SessionState> for RemoteState {
    fn from(state: SessionState) -> Self {
        match state {
            SessionState::Idle => RemoteState::Idle,
            SessionState::Ready => RemoteState::Ready,
            SessionState::Working => RemoteState::Working,
            SessionState::Waiting => RemoteState::Waiting,
            SessionState::Compacting => RemoteState::Compacting,
        }
    }
}
