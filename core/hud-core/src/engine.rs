//! HudEngine - the single entry point for presentation clients.
//!
//! The engine is single-threaded and synchronous. Each [`HudEngine::refresh`]
//! runs the whole pipeline to completion before publishing:
//!
//! ```text
//! read (projects, locks, records, shell, relay inbox)
//!   → associate + reconcile → flash → select active → publish (+ relay outbox)
//! ```
//!
//! If reading the lock store fails, the refresh returns the error and the
//! previously published snapshot stays in place. Relay I/O happens on the relay
//! worker thread and never holds up a refresh.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use hud_core::HudEngine;
//!
//! let mut engine = HudEngine::new()?;
//! let snapshot = engine.refresh()?;
//! for state in &snapshot.states {
//!     println!("{} {}", state.project.name, state.state);
//! }
//! engine.shutdown();
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::active::{ActiveInput, ActiveResolver};
use crate::agents::{AgentAdapter, AgentRegistry, AgentSession};
use crate::clock::{Clock, SystemClock};
use crate::config::{load_hud_config, load_projects, HudConfig};
use crate::error::Result;
use crate::relay::{
    ChannelOptions, ConnectionStatus, RelayChannel, RelayEvent, RelayTransport, RemoteMirror,
    WebSocketTransport,
};
use crate::shell::ShellCwdStore;
use crate::state::{
    FlashTracker, FsLockStore, Lock, LockStore, ProcessProbe, ReconcileInput, SessionRecord,
    StateReconciler, SystemProbe,
};
use crate::storage::StorageConfig;
use crate::types::{ActiveSelection, Project, ReconciledState};

/// What a client renders. Replaced wholesale on every successful refresh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HudSnapshot {
    pub states: Vec<ReconciledState>,
    pub active: ActiveSelection,
    pub relay_status: ConnectionStatus,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl HudSnapshot {
    pub fn state_for(&self, project_path: &str) -> Option<&ReconciledState> {
        self.states.iter().find(|s| s.project.path == project_path)
    }
}

/// Injection points. `Default` is what production uses.
pub struct EngineOptions {
    pub clock: Arc<dyn Clock>,
    pub probe: Arc<dyn ProcessProbe>,
    /// Replaces the built-in adapters when set.
    pub adapters: Option<Vec<Arc<dyn AgentAdapter>>>,
    /// Used only when `config.json` carries relay credentials.
    pub transport: Option<Box<dyn RelayTransport>>,
    pub channel: ChannelOptions,
    /// This process, as recorded in locks it acquires.
    pub pid: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            probe: Arc::new(SystemProbe),
            adapters: None,
            transport: None,
            channel: ChannelOptions::default(),
            pid: std::process::id(),
        }
    }
}

pub struct HudEngine {
    storage: StorageConfig,
    config: HudConfig,
    projects: Vec<Project>,
    registry: AgentRegistry,
    locks: Arc<dyn LockStore>,
    probe: Arc<dyn ProcessProbe>,
    shells: ShellCwdStore,
    reconciler: StateReconciler,
    flash: FlashTracker,
    active: ActiveResolver,
    relay: Option<RelayChannel>,
    relay_status: ConnectionStatus,
    mirror: RemoteMirror,
    clock: Arc<dyn Clock>,
    pid: u32,
    held_locks: Vec<String>,
    snapshot: HudSnapshot,
}

impl HudEngine {
    /// Engine over `~/.capacitor/` with the system clock and real pid checks.
    pub fn new() -> Result<Self> {
        Self::with_storage(StorageConfig::default())
    }

    pub fn with_storage(storage: StorageConfig) -> Result<Self> {
        Self::with_options(storage, EngineOptions::default())
    }

    pub fn with_options(storage: StorageConfig, options: EngineOptions) -> Result<Self> {
        let config = load_hud_config(&storage);
        let projects = load_projects(&storage);

        let registry = match options.adapters {
            Some(adapters) => AgentRegistry::with_adapters(adapters, config.agents.clone()),
            None => AgentRegistry::with_storage(config.agents.clone(), storage.clone()),
        };
        registry.initialize_all();

        let locks: Arc<dyn LockStore> = Arc::new(FsLockStore::with_probe(
            storage.sessions_dir(),
            options.probe.clone(),
        ));

        let (relay, relay_status) = match &config.relay {
            None => (None, ConnectionStatus::Disabled),
            Some(credentials) => {
                let transport = options
                    .transport
                    .unwrap_or_else(|| Box::new(WebSocketTransport::new()));
                match RelayChannel::spawn(
                    credentials,
                    transport,
                    config.thresholds.heartbeat_interval(),
                    options.channel,
                ) {
                    Ok(channel) => {
                        info!(device_id = %credentials.device_id, "Relay mode enabled");
                        (Some(channel), ConnectionStatus::Connecting)
                    }
                    Err(err) => {
                        warn!(error = %err, "Relay credentials unusable; relay disabled");
                        (None, ConnectionStatus::Misconfigured)
                    }
                }
            }
        };

        Ok(Self {
            shells: ShellCwdStore::new(storage.shell_cwd_file()),
            reconciler: StateReconciler::new(config.thresholds.clone()),
            storage,
            config,
            projects,
            registry,
            locks,
            probe: options.probe,
            flash: FlashTracker::new(),
            active: ActiveResolver::new(),
            relay,
            relay_status,
            mirror: RemoteMirror::new(),
            clock: options.clock,
            pid: options.pid,
            held_locks: Vec::new(),
            snapshot: HudSnapshot {
                relay_status,
                ..HudSnapshot::default()
            },
        })
    }

    pub fn storage(&self) -> &StorageConfig {
        &self.storage
    }

    pub fn config(&self) -> &HudConfig {
        &self.config
    }

    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    /// Replaces the tracked projects until the next [`Self::reload_projects`].
    pub fn set_projects(&mut self, projects: Vec<Project>) {
        self.projects = projects;
    }

    pub fn reload_projects(&mut self) {
        self.projects = load_projects(&self.storage);
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn lock_store(&self) -> &dyn LockStore {
        self.locks.as_ref()
    }

    pub fn remote_mirror(&self) -> &RemoteMirror {
        &self.mirror
    }

    /// The last published snapshot.
    pub fn snapshot(&self) -> &HudSnapshot {
        &self.snapshot
    }

    pub fn relay_status(&self) -> ConnectionStatus {
        self.relay_status
    }

    /// Runs one full cycle and publishes the result.
    pub fn refresh(&mut self) -> Result<HudSnapshot> {
        let now = self.clock.now();
        let thresholds = self.reconciler.thresholds().clone();

        let live_locks = match self.locks.live_locks() {
            Ok(locks) => locks,
            Err(err) => {
                warn!(error = %err, "Lock store unreadable; keeping previous snapshot");
                return Err(err);
            }
        };

        let records: Vec<SessionRecord> = self
            .registry
            .detect_all_sessions()
            .iter()
            .map(AgentSession::to_record)
            .collect();

        self.drain_relay(now);
        let expired = self.mirror.expire(now, thresholds.remote_expiry());
        if expired > 0 {
            debug!(expired, "Expired remote entries");
        }

        let remote = self.relay.as_ref().map(|_| &self.mirror);
        let mut states = self.reconciler.reconcile(&ReconcileInput {
            projects: &self.projects,
            records: &records,
            live_locks: &live_locks,
            remote,
            now,
        });
        self.flash.apply(&mut states, now, thresholds.flash());

        let shells = self.shells.load();
        let active = self.active.resolve(&ActiveInput {
            projects: &self.projects,
            shells: &shells,
            states: &states,
            probe: self.probe.as_ref(),
            now,
        });

        if let Some(channel) = self.relay.as_mut() {
            channel.publish(&states, now);
        }

        self.snapshot = HudSnapshot {
            states,
            active,
            relay_status: self.relay_status,
            refreshed_at: Some(now),
        };
        Ok(self.snapshot.clone())
    }

    fn drain_relay(&mut self, now: DateTime<Utc>) {
        let Some(channel) = self.relay.as_mut() else {
            return;
        };
        for event in channel.drain() {
            match event {
                RelayEvent::Status(status) => {
                    if status == ConnectionStatus::Connected && !self.relay_status.is_connected() {
                        self.mirror.set_connected(Some(now));
                    } else if !status.is_connected() {
                        self.mirror.set_connected(None);
                    }
                    self.relay_status = status;
                }
                RelayEvent::Snapshot(snapshot) => self.mirror.apply_snapshot(snapshot, now),
                RelayEvent::Heartbeat(heartbeat) => self.mirror.apply_heartbeat(&heartbeat, now),
            }
        }
    }

    /// Pins a project as active for the manual override window.
    pub fn set_manual_override(&mut self, project_path: &str) {
        let now = self.clock.now();
        let window = self.reconciler.thresholds().manual_override();
        self.active.set_manual_override(project_path, now, window);
    }

    pub fn clear_manual_override(&mut self) {
        self.active.clear_manual_override();
    }

    /// Claims `project_path` for this process. Released again on [`Self::shutdown`].
    pub fn acquire_local_lock(&mut self, project_path: &str, session_id: &str) -> Result<Lock> {
        let lock = self.locks.acquire(project_path, self.pid, session_id)?;
        if !self.held_locks.iter().any(|p| p == project_path) {
            self.held_locks.push(project_path.to_string());
        }
        Ok(lock)
    }

    pub fn release_local_lock(&mut self, project_path: &str) -> Result<bool> {
        self.held_locks.retain(|p| p != project_path);
        self.locks.release(project_path, self.pid)
    }

    /// Releases locks this process holds and closes the relay without waiting
    /// for in-flight sends.
    pub fn shutdown(&mut self) {
        for path in std::mem::take(&mut self.held_locks) {
            if let Err(err) = self.locks.release(&path, self.pid) {
                warn!(path = %path, error = %err, "Failed to release lock on shutdown");
            }
        }
        if let Some(mut channel) = self.relay.take() {
            channel.shutdown();
        }
        if self.relay_status != ConnectionStatus::Disabled {
            self.relay_status = ConnectionStatus::Disconnected;
        }
        self.mirror.set_connected(None);
    }
}

impl Drop for HudEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentType;
    use crate::clock::ManualClock;
    use crate::state::{PidSetProbe, SessionRecordStore};
    use crate::types::{ActiveSource, SessionState};
    use chrono::Duration;
    use tempfile::tempdir;

    struct Fixture {
        _temp: tempfile::TempDir,
        storage: StorageConfig,
        clock: Arc<ManualClock>,
        probe: Arc<PidSetProbe>,
    }

    impl Fixture {
        fn new(projects: &[&str]) -> Self {
            let temp = tempdir().unwrap();
            let storage = StorageConfig::with_root(temp.path().to_path_buf());
            let entries: Vec<String> = projects
                .iter()
                .map(|p| format!(r#"{{"path":"{}"}}"#, p))
                .collect();
            std::fs::write(
                storage.projects_file(),
                format!(r#"{{"projects":[{}]}}"#, entries.join(",")),
            )
            .unwrap();
            Self {
                _temp: temp,
                storage,
                clock: Arc::new(ManualClock::new(Utc::now())),
                probe: Arc::new(PidSetProbe::default()),
            }
        }

        fn engine(&self) -> HudEngine {
            HudEngine::with_options(
                self.storage.clone(),
                EngineOptions {
                    clock: self.clock.clone(),
                    probe: self.probe.clone(),
                    pid: 4242,
                    ..EngineOptions::default()
                },
            )
            .unwrap()
        }

        fn records(&self) -> SessionRecordStore {
            SessionRecordStore::new(self.storage.records_dir())
        }
    }

    #[test]
    fn test_refresh_without_sessions_is_idle() {
        let fixture = Fixture::new(&["/code/app"]);
        let mut engine = fixture.engine();
        let snapshot = engine.refresh().unwrap();

        assert_eq!(snapshot.states.len(), 1);
        assert_eq!(snapshot.states[0].state, SessionState::Idle);
        assert_eq!(snapshot.active.source, ActiveSource::None);
        assert_eq!(snapshot.relay_status, ConnectionStatus::Disabled);
        assert_eq!(engine.snapshot(), &snapshot);
    }

    #[test]
    fn test_locked_working_session_stays_working_and_is_active() {
        let fixture = Fixture::new(&["/code/app"]);
        let now = fixture.clock.now();
        fixture
            .records()
            .update_state("/code/app", AgentType::Claude, "s1", SessionState::Working, now)
            .unwrap();
        fixture.probe.set_alive(100, true);
        FsLockStore::with_probe(fixture.storage.sessions_dir(), fixture.probe.clone())
            .acquire("/code/app", 100, "s1")
            .unwrap();

        let mut engine = fixture.engine();
        let snapshot = engine.refresh().unwrap();
        let state = snapshot.state_for("/code/app").unwrap();
        assert_eq!(state.state, SessionState::Working);
        assert!(state.is_locked);
        assert_eq!(snapshot.active.source, ActiveSource::MostRecentAgentSession);
    }

    #[test]
    fn test_working_to_ready_flashes_then_clears() {
        let fixture = Fixture::new(&["/code/app"]);
        let now = fixture.clock.now();
        let store = fixture.records();
        store
            .update_state("/code/app", AgentType::Claude, "s1", SessionState::Working, now)
            .unwrap();
        fixture.probe.set_alive(100, true);
        FsLockStore::with_probe(fixture.storage.sessions_dir(), fixture.probe.clone())
            .acquire("/code/app", 100, "s1")
            .unwrap();

        let mut engine = fixture.engine();
        assert!(!engine.refresh().unwrap().states[0].flashing);

        fixture.clock.advance(Duration::seconds(1));
        store
            .update_state(
                "/code/app",
                AgentType::Claude,
                "s1",
                SessionState::Ready,
                fixture.clock.now(),
            )
            .unwrap();
        engine.registry().invalidate_all_caches();
        let snapshot = engine.refresh().unwrap();
        assert_eq!(snapshot.states[0].state, SessionState::Ready);
        assert!(snapshot.states[0].flashing);

        fixture.clock.advance(Duration::seconds(3));
        assert!(!engine.refresh().unwrap().states[0].flashing);
    }

    #[test]
    fn test_manual_override_wins_for_window() {
        let fixture = Fixture::new(&["/code/app", "/code/lib"]);
        let now = fixture.clock.now();
        fixture
            .records()
            .update_state("/code/app", AgentType::Claude, "s1", SessionState::Working, now)
            .unwrap();
        fixture.probe.set_alive(100, true);
        FsLockStore::with_probe(fixture.storage.sessions_dir(), fixture.probe.clone())
            .acquire("/code/app", 100, "s1")
            .unwrap();

        let mut engine = fixture.engine();
        engine.set_manual_override("/code/lib");
        let snapshot = engine.refresh().unwrap();
        assert_eq!(snapshot.active.source, ActiveSource::ManualOverride);
        assert_eq!(snapshot.active.project.unwrap().path, "/code/lib");

        fixture.clock.advance(Duration::seconds(11));
        let snapshot = engine.refresh().unwrap();
        assert_eq!(snapshot.active.source, ActiveSource::MostRecentAgentSession);
        assert_eq!(snapshot.active.project.unwrap().path, "/code/app");
    }

    #[test]
    fn test_shutdown_releases_only_own_locks() {
        let fixture = Fixture::new(&["/code/app", "/code/lib"]);
        fixture.probe.set_alive(4242, true);
        fixture.probe.set_alive(100, true);
        let store = FsLockStore::with_probe(fixture.storage.sessions_dir(), fixture.probe.clone());
        store.acquire("/code/lib", 100, "theirs").unwrap();

        let mut engine = fixture.engine();
        let lock = engine.acquire_local_lock("/code/app", "mine").unwrap();
        assert_eq!(lock.holder_pid, 4242);
        assert!(engine.refresh().unwrap().states[0].is_locked);

        engine.shutdown();
        assert!(store.get("/code/app").unwrap().is_none());
        assert!(store.get("/code/lib").unwrap().is_some());
    }

    #[test]
    fn test_misconfigured_relay_is_reported() {
        let fixture = Fixture::new(&["/code/app"]);
        std::fs::write(
            fixture.storage.config_file(),
            r#"{"relay":{"deviceId":"dev","secretKey":"too-short","relayUrl":"wss://relay"}}"#,
        )
        .unwrap();

        let mut engine = fixture.engine();
        assert_eq!(engine.relay_status(), ConnectionStatus::Misconfigured);
        let snapshot = engine.refresh().unwrap();
        assert_eq!(snapshot.relay_status, ConnectionStatus::Misconfigured);
        assert!(snapshot.states.iter().all(|s| s.origin == crate::types::StateOrigin::Local));
    }
}
