//! State reconciliation: many raw signals in, one lifecycle state per project out.
//!
//! # Inputs
//!
//! - Session records (any number per project, from any agent)
//! - Live locks
//! - Optionally, the remote mirror when relay mode is on
//!
//! # Association
//!
//! Every record and lock is attached to the deepest tracked project root that
//! contains its path (see [`super::resolver`]). Among a project's records the one
//! with the latest freshness wins (context update, else state change). Unparseable
//! timestamps rank below parseable ones; ties keep the first record in input order.
//!
//! # Rules
//!
//! Applied in this order to the selected record's state:
//!
//! 0. a local `Waiting` record counts as `Working`; only rule 5 yields `Waiting`
//! 1. locked + `Idle` → `Ready`
//! 2. unlocked + `Working`/`Compacting` → `Ready`
//! 3. unlocked + `Ready` older than `ready_stale` → `Idle`
//! 4. fresh `thinking=true` → `Working`; otherwise unlocked `Working` → `Ready`
//! 5. relay mode, remote `Working` with no heartbeat within `remote_stale` → `Waiting`
//!
//! Reconciliation is a pure function of its input and `now`. Flash bookkeeping,
//! which needs memory of the previous cycle, lives in [`FlashTracker`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::resolver::resolve_root;
use super::types::{Lock, SessionRecord};
use crate::clock::Expiring;
use crate::config::Thresholds;
use crate::relay::{RemoteEntry, RemoteMirror};
use crate::types::{Project, ReconciledState, SessionState, StateOrigin};

/// Everything one reconciliation cycle looks at.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileInput<'a> {
    pub projects: &'a [Project],
    pub records: &'a [SessionRecord],
    /// Locks whose holder is alive. Dead locks must be filtered out by the caller.
    pub live_locks: &'a [Lock],
    /// `Some` only in relay mode.
    pub remote: Option<&'a RemoteMirror>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StateReconciler {
    thresholds: Thresholds,
}

impl StateReconciler {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// One state per project, in project order. `flashing` is always `false` here.
    pub fn reconcile(&self, input: &ReconcileInput<'_>) -> Vec<ReconciledState> {
        let mut records_by_project: HashMap<&str, Vec<&SessionRecord>> = HashMap::new();
        for record in input.records {
            if let Some(project) = resolve_root(&record.path, input.projects, |p| p.path.as_str()) {
                records_by_project
                    .entry(project.path.as_str())
                    .or_default()
                    .push(record);
            }
        }

        let mut locked: HashMap<&str, &Lock> = HashMap::new();
        for lock in input.live_locks {
            if let Some(project) = resolve_root(&lock.path, input.projects, |p| p.path.as_str()) {
                locked.entry(project.path.as_str()).or_insert(lock);
            }
        }

        input
            .projects
            .iter()
            .map(|project| {
                let candidates = records_by_project
                    .get(project.path.as_str())
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                let lock = locked.get(project.path.as_str()).copied();
                self.reconcile_project(project, candidates, lock, input.remote, input.now)
            })
            .collect()
    }

    fn reconcile_project(
        &self,
        project: &Project,
        records: &[&SessionRecord],
        lock: Option<&Lock>,
        remote: Option<&RemoteMirror>,
        now: DateTime<Utc>,
    ) -> ReconciledState {
        let is_locked = lock.is_some();
        let record = select_record(records);

        let mut reconciled = ReconciledState {
            project: project.clone(),
            state: record.map(|r| r.state).unwrap_or_default(),
            is_locked,
            flashing: false,
            origin: StateOrigin::Local,
            session_id: record
                .map(|r| r.session_id.clone())
                .or_else(|| lock.map(|l| l.session_id.clone())),
            agent_type: record.map(|r| r.agent_type.id().to_string()),
            working_on: record.and_then(|r| r.working_on.clone()),
            state_changed_at: record.map(|r| r.state_changed_at.clone()),
        };
        reconciled.state = self.apply_local_rules(reconciled.state, record, is_locked, now);

        if let Some(mirror) = remote {
            if let Some(entry) = mirror.get(&project.path) {
                if remote_overrides(&reconciled, record, entry) {
                    reconciled.state = self.apply_remote_rule(mirror, entry, now);
                    reconciled.origin = StateOrigin::Remote;
                    reconciled.working_on = entry.state.working_on.clone();
                    reconciled.state_changed_at = Some(entry.state.last_updated.clone());
                    reconciled.session_id = None;
                    reconciled.agent_type = None;
                }
            }
        }

        reconciled
    }

    fn apply_local_rules(
        &self,
        mut state: SessionState,
        record: Option<&SessionRecord>,
        is_locked: bool,
        now: DateTime<Utc>,
    ) -> SessionState {
        if state == SessionState::Waiting {
            state = SessionState::Working;
        }

        if is_locked && state == SessionState::Idle {
            state = SessionState::Ready;
        }

        if !is_locked && state.is_busy() {
            state = SessionState::Ready;
        }

        if !is_locked && state == SessionState::Ready {
            let stale = match record.and_then(SessionRecord::state_changed) {
                Some(changed) => now - changed > self.thresholds.ready_stale(),
                None => true,
            };
            if stale {
                state = SessionState::Idle;
            }
        }

        let thinking = record.is_some_and(|r| self.is_thinking(r, now));
        if thinking {
            state = SessionState::Working;
        } else if !is_locked && state == SessionState::Working {
            state = SessionState::Ready;
        }

        state
    }

    fn is_thinking(&self, record: &SessionRecord, now: DateTime<Utc>) -> bool {
        if record.thinking != Some(true) {
            return false;
        }
        record
            .thinking_at()
            .is_some_and(|at| now - at <= self.thresholds.thinking_stale())
    }

    fn apply_remote_rule(
        &self,
        mirror: &RemoteMirror,
        entry: &RemoteEntry,
        now: DateTime<Utc>,
    ) -> SessionState {
        let state = SessionState::from(entry.state.state);
        if state == SessionState::Working
            && now - mirror.last_signal(entry) > self.thresholds.remote_stale()
        {
            return SessionState::Waiting;
        }
        state
    }
}

/// Latest freshness wins; first record wins ties. `None` ranks below any timestamp.
fn select_record<'a>(records: &[&'a SessionRecord]) -> Option<&'a SessionRecord> {
    let mut best: Option<&'a SessionRecord> = None;
    for record in records {
        match best {
            Some(current) if record.freshness() <= current.freshness() => {}
            _ => best = Some(*record),
        }
    }
    best
}

/// Remote state replaces local state when the local side has nothing to say, or
/// when the remote update is newer than the local record.
fn remote_overrides(
    local: &ReconciledState,
    record: Option<&SessionRecord>,
    entry: &RemoteEntry,
) -> bool {
    if local.state == SessionState::Idle {
        return true;
    }
    match (entry.state.last_updated_at(), record.and_then(SessionRecord::freshness)) {
        (Some(remote_at), Some(local_at)) => remote_at > local_at,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

/// Remembers last cycle's states and raises a short-lived flash when a project
/// changes into a state that needs attention.
#[derive(Debug, Default)]
pub struct FlashTracker {
    previous: HashMap<String, SessionState>,
    flashes: HashMap<String, Expiring<SessionState>>,
}

impl FlashTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `flashing` on each state. The first observation of a project never flashes.
    pub fn apply(
        &mut self,
        states: &mut [ReconciledState],
        now: DateTime<Utc>,
        duration: chrono::Duration,
    ) {
        let mut observed = HashMap::with_capacity(states.len());

        for reconciled in states.iter_mut() {
            let key = reconciled.project.path.clone();
            let changed = self
                .previous
                .get(&key)
                .is_some_and(|prev| *prev != reconciled.state);
            if changed && reconciled.state.needs_attention() {
                self.flashes
                    .insert(key.clone(), Expiring::new(reconciled.state, now, duration));
            }
            reconciled.flashing = self
                .flashes
                .get(&key)
                .and_then(|flash| flash.get(now))
                .is_some_and(|flashed| *flashed == reconciled.state);
            observed.insert(key, reconciled.state);
        }

        self.previous = observed;
        self.flashes.retain(|_, flash| !flash.is_expired(now));
    }
}
