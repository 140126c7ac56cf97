//! # hud-core
//!
//! Core library for Capacitor: decides, for each tracked project, whether a
//! coding-agent session is running there and what it is doing, and which
//! project is in focus. Optionally mirrors that view to a paired device.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. Relay I/O runs on its own thread.
//! - **Sidecar**: Hooks write, the engine only reads. Locks are the only
//!   coordination between processes.
//! - **Graceful degradation**: Missing or corrupt files read as absent, not errors.
//! - **Deterministic**: Reconciliation is a pure function of its inputs and the clock.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hud_core::HudEngine;
//!
//! let mut engine = HudEngine::new()?;
//! let snapshot = engine.refresh()?;
//! println!("{:?}", snapshot.active);
//! ```

pub mod active;
pub mod agents;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod relay;
pub mod shell;
pub mod state;
pub mod storage;
pub mod types;

pub use active::{ActiveInput, ActiveResolver};
pub use agents::{AgentAdapter, AgentConfig, AgentRegistry, AgentSession, AgentType};
pub use clock::{Clock, Expiring, ManualClock, SystemClock};
pub use config::{load_hud_config, load_projects, HudConfig, RelayCredentials, Thresholds};
pub use engine::{EngineOptions, HudEngine, HudSnapshot};
pub use error::{HudError, Result};
pub use relay::{ConnectionStatus, RelayError};
pub use shell::{ShellCwdState, ShellCwdStore, ShellEntry};
pub use storage::StorageConfig;
pub use types::*;
