//! Agent adapter interfaces and re-exports for CLI integrations.
//! Add new adapters in `registry.rs` so they are discoverable by clients.

mod claude;
mod registry;
mod stubs;
mod types;

pub use claude::ClaudeAdapter;
pub use registry::AgentRegistry;
pub use stubs::{AiderAdapter, AmpAdapter, CodexAdapter, DroidAdapter, OpenCodeAdapter};
pub use types::{AdapterError, AgentConfig, AgentSession, AgentType};

/// Trait for CLI agent integrations
///
/// Implementors should:
/// - Return transient failures as `AdapterError`; the registry logs them and
///   treats the adapter as having no sessions for that call
/// - Cache expensive operations internally when possible
/// - Never block on the agent process itself
pub trait AgentAdapter: Send + Sync {
    /// Unique identifier (e.g., "claude", "codex")
    fn id(&self) -> &'static str;

    /// Human-readable name (e.g., "Claude Code", "OpenAI Codex")
    fn display_name(&self) -> &'static str;

    /// Check if this agent's CLI is available on the system
    fn is_installed(&self) -> bool;

    /// Detect session state for a specific project path.
    /// `Ok(None)` means no session, which is not an error.
    fn detect_session(&self, project_path: &str) -> Result<Option<AgentSession>, AdapterError>;

    /// Called once at registry startup for any needed initialization
    fn initialize(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    /// Return all known sessions across all projects
    fn all_sessions(&self) -> Result<Vec<AgentSession>, AdapterError> {
        Ok(vec![])
    }

    /// Return the mtime of the state source for cache invalidation
    fn state_mtime(&self) -> Option<std::time::SystemTime> {
        None
    }
}

#[cfg(test)]
pub mod test_utils {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::SystemTime;

    /// How a [`TestAdapter`] misbehaves, if at all.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Failure {
        None,
        Error,
        Panic,
    }

    /// Test adapter for unit testing the registry
    pub struct TestAdapter {
        pub id: &'static str,
        pub name: &'static str,
        pub installed: AtomicBool,
        pub sessions: Mutex<Vec<AgentSession>>,
        pub mtime: Mutex<Option<SystemTime>>,
        pub failure: Mutex<Failure>,
        pub installed_checks: AtomicUsize,
        pub session_reads: AtomicUsize,
    }

    impl TestAdapter {
        pub fn new(id: &'static str, name: &'static str, installed: bool) -> Self {
            Self {
                id,
                name,
                installed: AtomicBool::new(installed),
                sessions: Mutex::new(vec![]),
                mtime: Mutex::new(None),
                failure: Mutex::new(Failure::None),
                installed_checks: AtomicUsize::new(0),
                session_reads: AtomicUsize::new(0),
            }
        }

        pub fn set_installed(&self, installed: bool) {
            self.installed.store(installed, Ordering::SeqCst);
        }

        pub fn add_session(&self, session: AgentSession) {
            self.sessions.lock().unwrap().push(session);
        }

        pub fn clear_sessions(&self) {
            self.sessions.lock().unwrap().clear();
        }

        pub fn set_mtime(&self, mtime: Option<SystemTime>) {
            *self.mtime.lock().unwrap() = mtime;
        }

        pub fn set_failure(&self, failure: Failure) {
            *self.failure.lock().unwrap() = failure;
        }

        fn check_failure(&self) -> Result<(), AdapterError> {
            let failure = *self.failure.lock().unwrap();
            match failure {
                Failure::None => Ok(()),
                Failure::Error => Err(AdapterError::IoError {
                    message: "simulated failure".to_string(),
                }),
                Failure::Panic => panic!("simulated adapter panic"),
            }
        }
    }

    impl AgentAdapter for TestAdapter {
        fn id(&self) -> &'static str {
            self.id
        }

        fn display_name(&self) -> &'static str {
            self.name
        }

        fn is_installed(&self) -> bool {
            self.installed_checks.fetch_add(1, Ordering::SeqCst);
            self.installed.load(Ordering::SeqCst)
        }

        fn detect_session(&self, project_path: &str) -> Result<Option<AgentSession>, AdapterError> {
            self.check_failure()?;
            Ok(self
                .sessions
                .lock()
                .unwrap()
                .iter()
                .find(|s| s.cwd == project_path)
                .cloned())
        }

        fn all_sessions(&self) -> Result<Vec<AgentSession>, AdapterError> {
            self.session_reads.fetch_add(1, Ordering::SeqCst);
            self.check_failure()?;
            Ok(self.sessions.lock().unwrap().clone())
        }

        fn state_mtime(&self) -> Option<SystemTime> {
            *self.mtime.lock().unwrap()
        }
    }
}
