//! Shell focus signal: `~/.capacitor/shell-cwd.json`.
//!
//! Written by `hud-hook cwd` from shell precmd hooks, read by the active project
//! resolver. Only the most recently updated shell is ever consumed.
//!
//! ```json
//! { "shells": { "12345": { "cwd": "/code/app", "tty": "/dev/ttys003",
//!                          "parent_app": "ghostty", "updated_at": "..." } } }
//! ```

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs_err as fs;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{HudError, Result};
use crate::state::ProcessProbe;
use crate::types::ParentApp;

/// Upper bound on remembered shells; the oldest are dropped first.
const MAX_SHELLS: usize = 64;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ShellEntry {
    pub cwd: String,
    pub tty: String,
    #[serde(default)]
    pub parent_app: ParentApp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmux_session: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmux_client_tty: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq)]
pub struct ShellCwdState {
    /// Keyed by shell pid, as a string so the file stays plain JSON.
    #[serde(default)]
    pub shells: BTreeMap<String, ShellEntry>,
}

impl ShellCwdState {
    /// The most recently updated shell. Ties go to the lowest pid key.
    pub fn most_recent(&self) -> Option<(u32, &ShellEntry)> {
        let mut best: Option<(u32, &ShellEntry)> = None;
        for (pid, entry) in &self.shells {
            let Ok(pid) = pid.parse::<u32>() else {
                continue;
            };
            let newer = best.map_or(true, |(_, current)| entry.updated_at > current.updated_at);
            if newer {
                best = Some((pid, entry));
            }
        }
        best
    }
}

#[derive(Debug, Clone)]
pub struct ShellCwdStore {
    path: PathBuf,
}

impl ShellCwdStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or corrupt files read as empty.
    pub fn load(&self) -> ShellCwdState {
        match fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|err| {
                warn!(path = %self.path.display(), error = %err, "Malformed shell-cwd file");
                ShellCwdState::default()
            }),
            Err(_) => ShellCwdState::default(),
        }
    }

    /// Upserts one shell, dropping shells whose process is gone.
    pub fn record(&self, pid: u32, entry: ShellEntry, probe: &dyn ProcessProbe) -> Result<()> {
        let mut state = self.load();
        state.shells.retain(|key, _| {
            key.parse::<u32>()
                .map(|other| other != pid && probe.is_alive(other))
                .unwrap_or(false)
        });
        state.shells.insert(pid.to_string(), entry);

        while state.shells.len() > MAX_SHELLS {
            let oldest = state
                .shells
                .iter()
                .min_by_key(|(_, e)| e.updated_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    state.shells.remove(&key);
                }
                None => break,
            }
        }

        self.write(&state)
    }

    fn write(&self, state: &ShellCwdState) -> Result<()> {
        let dir = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&dir)
            .map_err(|e| HudError::io(format!("creating {}", dir.display()), e))?;

        let content = serde_json::to_vec_pretty(state)
            .map_err(|e| HudError::json("serializing shell-cwd", e))?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .map_err(|e| HudError::io("creating shell-cwd temp file", e))?;
        tmp.write_all(&content)
            .map_err(|e| HudError::io("writing shell-cwd temp file", e))?;
        tmp.persist(&self.path)
            .map_err(|e| HudError::io(format!("replacing {}", self.path.display()), e.error))?;
        Ok(())
    }
}
