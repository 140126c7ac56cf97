//! Coordinates agent adapters, user preferences, and session caching.
//!
//! Every adapter call goes through [`guarded`], so an adapter that errors or panics
//! degrades to "no sessions" for itself without affecting the others.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use tracing::{debug, warn};

use super::claude::ClaudeAdapter;
use super::stubs::{AiderAdapter, AmpAdapter, CodexAdapter, DroidAdapter, OpenCodeAdapter};
use super::types::{AdapterError, AgentConfig, AgentSession};
use super::AgentAdapter;
use crate::storage::StorageConfig;

struct CachedSessions {
    mtime: SystemTime,
    sessions: Vec<AgentSession>,
}

#[derive(Default)]
struct SessionCache {
    entries: HashMap<String, CachedSessions>,
}

pub struct AgentRegistry {
    adapters: Vec<Arc<dyn AgentAdapter>>,
    config: AgentConfig,
    session_cache: RwLock<SessionCache>,
}

/// Runs one adapter operation, converting errors and panics into `None`.
fn guarded<T>(
    adapter: &dyn AgentAdapter,
    operation: &'static str,
    f: impl FnOnce() -> Result<T, AdapterError>,
) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(err)) => {
            warn!(adapter = adapter.id(), operation, error = %err, "Adapter call failed");
            None
        }
        Err(_) => {
            warn!(adapter = adapter.id(), operation, "Adapter call panicked");
            None
        }
    }
}

impl AgentRegistry {
    pub fn new(config: AgentConfig) -> Self {
        Self::with_storage(config, StorageConfig::default())
    }

    pub fn with_storage(config: AgentConfig, storage: StorageConfig) -> Self {
        Self::with_adapters(Self::create_adapters(storage), config)
    }

    pub fn with_adapters(adapters: Vec<Arc<dyn AgentAdapter>>, config: AgentConfig) -> Self {
        Self {
            adapters,
            config,
            session_cache: RwLock::new(SessionCache::default()),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Initialize all enabled adapters, logging any failures
    pub fn initialize_all(&self) {
        for adapter in self.enabled_adapters() {
            guarded(adapter, "initialize", || adapter.initialize());
        }
    }

    fn enabled_adapters(&self) -> impl Iterator<Item = &dyn AgentAdapter> + '_ {
        self.adapters
            .iter()
            .filter(|a| !self.config.is_disabled(a.id()))
            .map(|a| a.as_ref())
    }

    /// Get all installed agents, respecting user preferences.
    ///
    /// Disabled agents are filtered before `is_installed` runs, so they are never probed.
    pub fn installed_agents(&self) -> Vec<&dyn AgentAdapter> {
        let mut agents: Vec<_> = self
            .enabled_adapters()
            .filter(|a| guarded(*a, "is_installed", || Ok(a.is_installed())).unwrap_or(false))
            .collect();

        agents.sort_by(|a, b| {
            let pos_a = self.config.display_order.iter().position(|x| x == a.id());
            let pos_b = self.config.display_order.iter().position(|x| x == b.id());
            match (pos_a, pos_b) {
                (Some(i), Some(j)) => i.cmp(&j),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => a.id().cmp(b.id()),
            }
        });

        agents
    }

    /// Detect sessions from all agents for a project path, in display order
    pub fn detect_sessions_for(&self, project_path: &str) -> Vec<AgentSession> {
        self.installed_agents()
            .into_iter()
            .filter_map(|adapter| {
                guarded(adapter, "detect_session", || adapter.detect_session(project_path))
                    .flatten()
            })
            .collect()
    }

    /// Detect primary session for a project (first in preference order)
    /// Short-circuits on first match
    pub fn detect_primary_session(&self, project_path: &str) -> Option<AgentSession> {
        self.installed_agents().into_iter().find_map(|adapter| {
            guarded(adapter, "detect_session", || adapter.detect_session(project_path)).flatten()
        })
    }

    /// Every session from every enabled, installed adapter, in display order.
    ///
    /// Cached per (adapter id, state mtime). Avoids holding locks during I/O:
    /// 1. Read lock to check cache validity
    /// 2. Release lock, perform I/O for stale adapters
    /// 3. Write lock briefly to update cache
    ///
    /// Failed reads are not cached, so the next call retries them.
    pub fn detect_all_sessions(&self) -> Vec<AgentSession> {
        let installed = self.installed_agents();

        enum Slot<'a> {
            Cached(Vec<AgentSession>),
            Stale(&'a dyn AgentAdapter, Option<SystemTime>),
        }

        // Phase 1: Check cache validity under read lock
        let slots: Vec<Slot<'_>> = {
            // Recover from poisoning - cache corruption is non-fatal, just refetch
            let cache = self
                .session_cache
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());

            installed
                .into_iter()
                .map(|adapter| {
                    let current_mtime = adapter.state_mtime();
                    match (current_mtime, cache.entries.get(adapter.id())) {
                        (Some(mtime), Some(cached)) if cached.mtime == mtime => {
                            Slot::Cached(cached.sessions.clone())
                        }
                        _ => Slot::Stale(adapter, current_mtime),
                    }
                })
                .collect()
        };

        // Phase 2: Fetch sessions for stale adapters (I/O without lock)
        let mut fresh: Vec<(String, SystemTime, Vec<AgentSession>)> = Vec::new();
        let mut all_sessions = Vec::new();
        for slot in slots {
            match slot {
                Slot::Cached(sessions) => all_sessions.extend(sessions),
                Slot::Stale(adapter, mtime) => {
                    let Some(sessions) = guarded(adapter, "all_sessions", || adapter.all_sessions())
                    else {
                        continue;
                    };
                    if let Some(mtime) = mtime {
                        fresh.push((adapter.id().to_string(), mtime, sessions.clone()));
                    }
                    all_sessions.extend(sessions);
                }
            }
        }

        // Phase 3: Update cache under write lock (brief)
        if !fresh.is_empty() {
            let mut cache = self
                .session_cache
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            for (id, mtime, sessions) in fresh {
                debug!(adapter = %id, count = sessions.len(), "Cached adapter sessions");
                cache.entries.insert(id, CachedSessions { mtime, sessions });
            }
        }

        all_sessions
    }

    /// Invalidate the session cache for a specific adapter
    pub fn invalidate_cache(&self, adapter_id: &str) {
        // Recover from poisoning - invalidation clears corrupt data anyway
        let mut cache = self
            .session_cache
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        cache.entries.remove(adapter_id);
    }

    /// Invalidate all caches
    pub fn invalidate_all_caches(&self) {
        let mut cache = self
            .session_cache
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        cache.entries.clear();
    }

    fn create_adapters(storage: StorageConfig) -> Vec<Arc<dyn AgentAdapter>> {
        vec![
            Arc::new(ClaudeAdapter::with_storage(storage)),
            Arc::new(CodexAdapter::new()),
            Arc::new(AiderAdapter::new()),
            Arc::new(AmpAdapter::new()),
            Arc::new(OpenCodeAdapter::new()),
            Arc::new(DroidAdapter::new()),
        ]
    }
}
