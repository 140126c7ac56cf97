//! Storage configuration and path management for Capacitor.
//!
//! This module provides a centralized `StorageConfig` struct that manages all
//! file paths for Capacitor data. This abstraction enables:
//!
//! - Easy path changes without hunting through code
//! - Testability via dependency injection (inject temp paths)
//!
//! ## Layout
//!
//! ```text
//! ~/.capacitor/
//! ├── config.json          # agent preferences, thresholds, relay pairing (read-only here)
//! ├── projects.json        # tracked project roots
//! ├── shell-cwd.json       # shell focus signal (written by `hud-hook cwd`)
//! ├── records/             # one session record per (path, agent)
//! ├── sessions/            # one lock file per project path hash
//! └── logs/                # hud-hook rolling logs
//! ```

use std::path::{Path, PathBuf};

/// Central configuration for all Capacitor storage paths.
///
/// Production code uses `StorageConfig::default()` which points to `~/.capacitor/`.
/// Tests use `StorageConfig::with_root(temp_dir)` for isolation.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory for all Capacitor data (default: ~/.capacitor)
    root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
        Self {
            root: home.join(".capacitor"),
        }
    }
}

impl StorageConfig {
    /// Creates a StorageConfig with a custom root directory.
    /// Used for testing with temp directories.
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    /// Returns the root directory for Capacitor data.
    pub fn root(&self) -> &Path {
        &self.root
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Global Files
    // ─────────────────────────────────────────────────────────────────────────────

    /// Path to projects.json (tracked projects list).
    pub fn projects_file(&self) -> PathBuf {
        self.root.join("projects.json")
    }

    /// Path to config.json (agent preferences, thresholds, relay pairing).
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// Path to shell-cwd.json (most recent shell working directories).
    pub fn shell_cwd_file(&self) -> PathBuf {
        self.root.join("shell-cwd.json")
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Directories
    // ─────────────────────────────────────────────────────────────────────────────

    /// Path to records/ directory (session records written by hooks).
    pub fn records_dir(&self) -> PathBuf {
        self.root.join("records")
    }

    /// Path to sessions/ directory (lock files).
    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    /// Path to logs/ directory.
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
}
