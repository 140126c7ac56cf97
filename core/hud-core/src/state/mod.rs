//! Session State Detection
//!
//! Determines, per tracked project, whether an agent session is running there and
//! what it is doing.
//!
//! # Architecture: Sidecar Pattern
//!
//! Capacitor observes agents without interfering. Hook processes are the only
//! writers; the engine is a passive reader.
//!
//! ```text
//! Agent CLI → hud-hook → records/ + sessions/ → This Module → Presentation
//!  (user)     (writer)        (storage)          (reader)       (display)
//! ```
//!
//! # Two Signals
//!
//! 1. **Locks** (`sessions/{hash}.lock`): ownership of a project path by a live
//!    process. Liveness of the holder, never age, decides whether a lock counts.
//! 2. **Session records** (`records/{hash}.{agent}.json`): the latest lifecycle
//!    state each agent reported for a path, plus optional thinking and context
//!    timestamps.
//!
//! The reconciler fuses both into one [`crate::types::ReconciledState`] per project.
//!
//! # Module Structure
//!
//! - [`lock`]: lock store trait, filesystem implementation, pid liveness
//! - [`store`]: per-(path, agent) session record files
//! - [`resolver`]: path → best matching root
//! - [`reconcile`]: staleness-driven lifecycle rules and flash tracking
//! - [`hook`] / [`transition`]: hook payloads and the event → state mapping

mod hook;
pub mod lock;
mod path_utils;
mod reconcile;
pub mod resolver;
mod store;
mod transition;
mod types;


pub use hook::{HookEvent, HookInput};
pub use lock::{
    compute_lock_hash, is_pid_alive, FsLockStore, LockStore, PidSetProbe, ProcessProbe,
    SystemProbe,
};
pub use path_utils::{
    normalize_path_for_comparison, normalize_path_for_matching, relate, PathRelation,
};
pub use reconcile::{FlashTracker, ReconcileInput, StateReconciler};
pub use resolver::{resolve, resolve_root, specificity, Specificity};
pub use store::SessionRecordStore;
pub use transition::{next_state, Transition};
pub use types::{parse_timestamp, Lock, SessionRecord};
