//! Shell CWD tracking for ambient project awareness.
//!
//! Called by shell precmd hooks to report the current working directory.
//! Writes the shell's entry into `~/.capacitor/shell-cwd.json`.
//!
//! ## Usage
//!
//! ```bash
//! hud-hook cwd /path/to/project 12345 /dev/ttys003
//! ```
//!
//! ## Performance
//!
//! Target: < 15ms total execution time.
//! The shell spawns this in the background, so users never wait.

use chrono::Utc;
use hud_core::state::SystemProbe;
use hud_core::{ParentApp, ShellCwdStore, ShellEntry, StorageConfig};

use crate::error::HookError;

fn shell_entry(cwd: String, tty: String, parent_app: ParentApp) -> ShellEntry {
    let (tmux_session, tmux_client_tty) = if parent_app == ParentApp::Tmux {
        detect_tmux_context().map_or((None, None), |(s, t)| (Some(s), Some(t)))
    } else {
        (None, None)
    };

    ShellEntry {
        cwd,
        tty,
        parent_app,
        tmux_session,
        tmux_client_tty,
        updated_at: Utc::now(),
    }
}

// MARK: - Public API

pub fn run(path: &str, pid: u32, tty: &str) -> Result<(), HookError> {
    let store = ShellCwdStore::new(StorageConfig::default().shell_cwd_file());
    record(&store, path, pid, tty)
}

fn record(store: &ShellCwdStore, path: &str, pid: u32, tty: &str) -> Result<(), HookError> {
    let entry = shell_entry(normalize_path(path), tty.to_string(), detect_parent_app(pid));
    store.record(pid, entry, &SystemProbe)?;
    Ok(())
}

fn normalize_path(path: &str) -> String {
    if path == "/" {
        "/".to_string()
    } else {
        path.trim_end_matches('/').to_string()
    }
}

fn detect_parent_app(_pid: u32) -> ParentApp {
    if std::env::var("TMUX").is_ok() {
        return ParentApp::Tmux;
    }

    if let Ok(term_program) = std::env::var("TERM_PROGRAM") {
        let normalized = term_program.to_lowercase();
        match normalized.as_str() {
            "iterm.app" | "iterm2" => return ParentApp::ITerm,
            "apple_terminal" | "terminal.app" | "terminal" => return ParentApp::Terminal,
            "warpterminal" | "warp" => return ParentApp::Warp,
            "ghostty" => return ParentApp::Ghostty,
            "vscode" => return ParentApp::VSCode,
            "vscode-insiders" => return ParentApp::VSCodeInsiders,
            "cursor" => return ParentApp::Cursor,
            "zed" => return ParentApp::Zed,
            _ => {}
        }
    }

    if let Ok(term) = std::env::var("TERM") {
        let normalized = term.to_lowercase();
        if normalized.contains("kitty") {
            return ParentApp::Kitty;
        }
        if normalized.contains("alacritty") {
            return ParentApp::Alacritty;
        }
    }

    ParentApp::Unknown
}

fn detect_tmux_context() -> Option<(String, String)> {
    if std::env::var("TMUX").is_err() {
        return None;
    }

    let session = std::process::Command::new("tmux")
        .args(["display-message", "-p", "#S"])
        .output()
        .ok()
        .and_then(|out| {
            if out.status.success() {
                Some(String::from_utf8_lossy(&out.stdout).trim().to_string())
            } else {
                None
            }
        })
        .filter(|value| !value.is_empty());

    let client_tty = std::process::Command::new("tmux")
        .args(["display-message", "-p", "#{client_tty}"])
        .output()
        .ok()
        .and_then(|out| {
            if out.status.success() {
                Some(String::from_utf8_lossy(&out.stdout).trim().to_string())
            } else {
                None
            }
        })
        .filter(|value| !value.is_empty());

    match (session, client_tty) {
        (Some(session), Some(client_tty)) => Some((session, client_tty)),
        _ => None,
    }
}
