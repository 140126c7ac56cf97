//! Configuration loading.
//!
//! Everything here is read-only from the engine's point of view: the desktop app
//! owns `config.json` and `projects.json`. Missing files read as defaults; corrupt
//! files log a warning and also read as defaults.

use std::fmt;

use chrono::Duration;
use fs_err as fs;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::agents::AgentConfig;
use crate::storage::StorageConfig;
use crate::types::Project;

/// Contents of `config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HudConfig {
    #[serde(flatten)]
    pub agents: AgentConfig,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub relay: Option<RelayCredentials>,
}

/// Staleness windows and timer lengths, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Unlocked `Ready` older than this becomes `Idle`.
    pub ready_stale_secs: u64,
    /// `thinking=true` older than this is ignored.
    pub thinking_stale_secs: u64,
    /// Remote `Working` without a heartbeat for this long becomes `Waiting`.
    pub remote_stale_secs: u64,
    /// Remote entries with no update or heartbeat for this long are dropped.
    pub remote_expiry_secs: u64,
    pub flash_secs: u64,
    pub manual_override_secs: u64,
    pub heartbeat_interval_secs: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            ready_stale_secs: 120,
            thinking_stale_secs: 30,
            remote_stale_secs: 60,
            remote_expiry_secs: 600,
            flash_secs: 2,
            manual_override_secs: 10,
            heartbeat_interval_secs: 15,
        }
    }
}

impl Thresholds {
    pub fn ready_stale(&self) -> Duration {
        secs(self.ready_stale_secs)
    }

    pub fn thinking_stale(&self) -> Duration {
        secs(self.thinking_stale_secs)
    }

    pub fn remote_stale(&self) -> Duration {
        secs(self.remote_stale_secs)
    }

    pub fn remote_expiry(&self) -> Duration {
        secs(self.remote_expiry_secs)
    }

    pub fn flash(&self) -> Duration {
        secs(self.flash_secs)
    }

    pub fn manual_override(&self) -> Duration {
        secs(self.manual_override_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        secs(self.heartbeat_interval_secs)
    }
}

fn secs(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX / 1000))
}

/// Pre-shared pairing credential for the relay. How it was obtained is not our concern.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayCredentials {
    #[serde(alias = "deviceId")]
    pub device_id: String,
    /// Base64-encoded 32-byte key.
    #[serde(alias = "secretKey")]
    pub secret_key: String,
    #[serde(alias = "relayUrl")]
    pub relay_url: String,
}

impl fmt::Debug for RelayCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayCredentials")
            .field("device_id", &self.device_id)
            .field("secret_key", &"<redacted>")
            .field("relay_url", &self.relay_url)
            .finish()
    }
}

/// Loads `config.json`, returning defaults if it is missing or unreadable.
pub fn load_hud_config(storage: &StorageConfig) -> HudConfig {
    let path = storage.config_file();
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return HudConfig::default(),
        Err(err) => {
            warn!(error = %err, "Failed to read config, using defaults");
            return HudConfig::default();
        }
    };

    serde_json::from_str(&content).unwrap_or_else(|err| {
        warn!(path = %path.display(), error = %err, "Malformed config, using defaults");
        HudConfig::default()
    })
}

#[derive(Debug, Default, Deserialize)]
struct ProjectsFile {
    #[serde(default)]
    projects: Vec<ProjectEntry>,
}

#[derive(Debug, Deserialize)]
struct ProjectEntry {
    path: String,
    #[serde(default)]
    name: Option<String>,
}

/// Loads tracked projects from `projects.json`. Duplicate paths keep the first entry.
pub fn load_projects(storage: &StorageConfig) -> Vec<Project> {
    let path = storage.projects_file();
    let file: ProjectsFile = match fs::read_to_string(&path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|err| {
            warn!(path = %path.display(), error = %err, "Malformed projects file");
            ProjectsFile::default()
        }),
        Err(_) => ProjectsFile::default(),
    };

    let mut projects: Vec<Project> = Vec::with_capacity(file.projects.len());
    for entry in file.projects {
        if projects.iter().any(|p| p.path == entry.path) {
            continue;
        }
        projects.push(match entry.name {
            Some(name) => Project {
                path: entry.path,
                name,
            },
            None => Project::from_path(entry.path),
        });
    }
    projects
}
