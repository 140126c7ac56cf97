//! Event handler for agent hooks.
//!
//! Reads JSON from stdin, maps the hook event to a record transition, and writes
//! the session record and lock directly. See `hud_core::state::next_state` for
//! the event → state table.
//!
//! SessionStart and UserPromptSubmit claim the project lock for the agent (our
//! parent process) and spawn a `lock-holder` that releases it when the agent exits.

use std::env;
use std::io::{self, Read};
use std::process::{Command, Stdio};

use chrono::{DateTime, Utc};
use hud_core::state::{
    next_state, FsLockStore, HookEvent, HookInput, LockStore, SessionRecordStore, Transition,
};
use hud_core::{AgentType, SessionState, StorageConfig};

use crate::error::HookError;

/// What one invocation did. Returned for tests and logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Written(SessionState),
    Removed,
    Skipped,
}

/// A lock this invocation newly created or took over, to hand to a lock holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockClaim {
    pub session_id: String,
    pub cwd: String,
    pub pid: u32,
}

pub fn run() -> Result<(), HookError> {
    // Skip if this is a summary generation subprocess
    if env::var("HUD_SUMMARY_GEN").is_ok_and(|v| v == "1") {
        let _ = io::stdin().read_to_end(&mut Vec::new());
        return Ok(());
    }

    let mut input = String::new();
    io::stdin().read_to_string(&mut input)?;
    if input.trim().is_empty() {
        return Ok(());
    }
    let hook_input: HookInput = serde_json::from_str(&input)?;

    let storage = StorageConfig::default();
    let agent_pid = get_ppid().unwrap_or_else(std::process::id);
    let (outcome, claim) = handle_hook_input(&hook_input, &storage, agent_pid, Utc::now())?;

    tracing::debug!(
        event = ?hook_input.hook_event_name,
        session = ?hook_input.session_id,
        outcome = ?outcome,
        "Hook handled"
    );

    if let Some(claim) = claim {
        spawn_lock_holder(&claim, &storage);
    }
    Ok(())
}

/// Returns true if the session is in an active state that shouldn't be overridden.
fn is_active_state(state: SessionState) -> bool {
    matches!(
        state,
        SessionState::Working | SessionState::Waiting | SessionState::Compacting
    )
}

pub fn handle_hook_input(
    hook_input: &HookInput,
    storage: &StorageConfig,
    agent_pid: u32,
    now: DateTime<Utc>,
) -> Result<(Outcome, Option<LockClaim>), HookError> {
    let Some(event) = hook_input.to_event() else {
        return Ok((Outcome::Skipped, None));
    };
    let Some(session_id) = hook_input.session_id.as_deref().filter(|s| !s.is_empty()) else {
        tracing::debug!(event = ?hook_input.hook_event_name, "Skipping event (missing session_id)");
        return Ok((Outcome::Skipped, None));
    };
    let Some(cwd) = hook_input.resolve_cwd(None) else {
        tracing::debug!(
            event = ?hook_input.hook_event_name,
            session = %session_id,
            "Skipping event (missing cwd)"
        );
        return Ok((Outcome::Skipped, None));
    };

    let records = SessionRecordStore::new(storage.records_dir());
    let locks = FsLockStore::new(storage.sessions_dir());
    let existing = records.read(&cwd, AgentType::Claude)?;

    let outcome = match next_state(&event) {
        Transition::Keep => Outcome::Skipped,
        Transition::Remove => {
            // A newer session may own this path by now; only remove our own record.
            let ours = existing.as_ref().is_some_and(|r| r.session_id == session_id);
            if ours {
                records.remove(&cwd, AgentType::Claude)?;
            }
            locks.release(&cwd, agent_pid)?;
            Outcome::Removed
        }
        Transition::Set(state) => {
            let resumed_active = matches!(event, HookEvent::SessionStart)
                && existing
                    .as_ref()
                    .is_some_and(|r| r.session_id == session_id && is_active_state(r.state));
            if resumed_active {
                Outcome::Skipped
            } else {
                let mut record =
                    records.update_state(&cwd, AgentType::Claude, session_id, state, now)?;
                let working_on = match event {
                    HookEvent::UserPromptSubmit => hook_input.prompt_summary(),
                    _ => None,
                };
                let mut dirty = record.pid != Some(agent_pid);
                record.pid = Some(agent_pid);
                if let Some(summary) = working_on {
                    record.working_on = Some(summary);
                    dirty = true;
                }
                if dirty {
                    records.write(&record)?;
                }
                Outcome::Written(state)
            }
        }
    };

    let claim = if Transition::claims_lock(&event) {
        claim_lock(&locks, &cwd, agent_pid, session_id)?
    } else {
        None
    };

    Ok((outcome, claim))
}

/// Acquires the lock and reports whether a holder needs to be started for it.
fn claim_lock(
    locks: &FsLockStore,
    cwd: &str,
    agent_pid: u32,
    session_id: &str,
) -> Result<Option<LockClaim>, HookError> {
    let already_ours = locks
        .get(cwd)?
        .is_some_and(|l| l.holder_pid == agent_pid && l.session_id == session_id);
    let lock = locks.acquire(cwd, agent_pid, session_id)?;
    if let Some(previous) = lock.handoff_from {
        tracing::info!(path = %cwd, from = previous, to = agent_pid, "Lock taken over");
    }
    if already_ours {
        return Ok(None);
    }
    Ok(Some(LockClaim {
        session_id: session_id.to_string(),
        cwd: cwd.to_string(),
        pid: agent_pid,
    }))
}

fn spawn_lock_holder(claim: &LockClaim, storage: &StorageConfig) {
    let exe = match env::current_exe() {
        Ok(exe) => exe,
        Err(err) => {
            tracing::warn!(error = %err, "Cannot locate hud-hook binary; no lock holder");
            return;
        }
    };

    let spawned = Command::new(exe)
        .arg("lock-holder")
        .arg("--session-id")
        .arg(&claim.session_id)
        .arg("--cwd")
        .arg(&claim.cwd)
        .arg("--pid")
        .arg(claim.pid.to_string())
        .arg("--lock-dir")
        .arg(storage.sessions_dir())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();

    match spawned {
        Ok(child) => tracing::debug!(holder = child.id(), pid = claim.pid, "Lock holder spawned"),
        Err(err) => tracing::warn!(error = %err, "Failed to spawn lock holder"),
    }
}

fn get_ppid() -> Option<u32> {
    #[cfg(unix)]
    {
        // SAFETY: getppid() is a simple syscall that returns the parent process ID.
        // It has no failure modes and always returns a valid PID (1 if parent exited).
        #[allow(unsafe_code)]
        Some(unsafe { libc::getppid() } as u32)
    }
    #[cfg(not(unix))]
    {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn input(json: &str) -> HookInput {
        serde_json::from_str(json).unwrap()
    }

    fn fixture() -> (tempfile::TempDir, StorageConfig) {
        let temp = tempdir().unwrap();
        let storage = StorageConfig::with_root(temp.path().to_path_buf());
        (temp, storage)
    }

    fn records(storage: &StorageConfig) -> SessionRecordStore {
        SessionRecordStore::new(storage.records_dir())
    }

    fn locks(storage: &StorageConfig) -> FsLockStore {
        FsLockStore::new(storage.sessions_dir())
    }

    #[test]
    fn test_session_start_writes_ready_and_claims_lock() {
        let (_temp, storage) = fixture();
        let (outcome, claim) = handle_hook_input(
            &input(r#"{"hook_event_name":"SessionStart","session_id":"s1","cwd":"/repo/"}"#),
            &storage,
            100,
            Utc::now(),
        )
        .unwrap();

        assert_eq!(outcome, Outcome::Written(SessionState::Ready));
        let record = records(&storage).read("/repo", AgentType::Claude).unwrap().unwrap();
        assert_eq!(record.path, "/repo");
        assert_eq!(record.pid, Some(100));
        assert_eq!(claim.unwrap().pid, 100);
        assert_eq!(locks(&storage).get("/repo").unwrap().unwrap().holder_pid, 100);
    }

    #[test]
    fn test_repeated_prompt_does_not_respawn_holder() {
        let (_temp, storage) = fixture();
        let prompt = input(
            r#"{"hook_event_name":"UserPromptSubmit","session_id":"s1","cwd":"/repo","prompt":"Fix the flaky test\nmore detail"}"#,
        );
        let (_, first) = handle_hook_input(&prompt, &storage, 100, Utc::now()).unwrap();
        let (outcome, second) = handle_hook_input(&prompt, &storage, 100, Utc::now()).unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(outcome, Outcome::Written(SessionState::Working));
        let record = records(&storage).read("/repo", AgentType::Claude).unwrap().unwrap();
        assert_eq!(record.working_on.as_deref(), Some("Fix the flaky test"));
    }

    #[test]
    fn test_tool_use_keeps_state_changed_at() {
        let (_temp, storage) = fixture();
        let start = Utc::now();
        handle_hook_input(
            &input(r#"{"hook_event_name":"UserPromptSubmit","session_id":"s1","cwd":"/repo"}"#),
            &storage,
            100,
            start,
        )
        .unwrap();
        let (outcome, claim) = handle_hook_input(
            &input(r#"{"hook_event_name":"PostToolUse","session_id":"s1","cwd":"/repo","tool_name":"Edit"}"#),
            &storage,
            100,
            start + chrono::Duration::seconds(30),
        )
        .unwrap();

        assert_eq!(outcome, Outcome::Written(SessionState::Working));
        assert!(claim.is_none());
        let record = records(&storage).read("/repo", AgentType::Claude).unwrap().unwrap();
        assert_eq!(record.state_changed_at, start.to_rfc3339());
    }

    #[test]
    fn test_session_start_does_not_clobber_active_session() {
        let (_temp, storage) = fixture();
        let now = Utc::now();
        handle_hook_input(
            &input(r#"{"hook_event_name":"PermissionRequest","session_id":"s1","cwd":"/repo"}"#),
            &storage,
            100,
            now,
        )
        .unwrap();
        let (outcome, _) = handle_hook_input(
            &input(r#"{"hook_event_name":"SessionStart","session_id":"s1","cwd":"/repo"}"#),
            &storage,
            100,
            now,
        )
        .unwrap();

        assert_eq!(outcome, Outcome::Skipped);
        let record = records(&storage).read("/repo", AgentType::Claude).unwrap().unwrap();
        assert_eq!(record.state, SessionState::Waiting);
    }

    #[test]
    fn test_stop_with_hook_active_is_ignored() {
        let (_temp, storage) = fixture();
        let now = Utc::now();
        handle_hook_input(
            &input(r#"{"hook_event_name":"UserPromptSubmit","session_id":"s1","cwd":"/repo"}"#),
            &storage,
            100,
            now,
        )
        .unwrap();
        let (outcome, _) = handle_hook_input(
            &input(r#"{"hook_event_name":"Stop","session_id":"s1","cwd":"/repo","stop_hook_active":true}"#),
            &storage,
            100,
            now,
        )
        .unwrap();
        assert_eq!(outcome, Outcome::Skipped);

        let (outcome, _) = handle_hook_input(
            &input(r#"{"hook_event_name":"Stop","session_id":"s1","cwd":"/repo"}"#),
            &storage,
            100,
            now,
        )
        .unwrap();
        assert_eq!(outcome, Outcome::Written(SessionState::Ready));
    }

    #[test]
    fn test_session_end_removes_own_record_and_lock() {
        let (_temp, storage) = fixture();
        let now = Utc::now();
        handle_hook_input(
            &input(r#"{"hook_event_name":"SessionStart","session_id":"s1","cwd":"/repo"}"#),
            &storage,
            100,
            now,
        )
        .unwrap();
        let (outcome, _) = handle_hook_input(
            &input(r#"{"hook_event_name":"SessionEnd","session_id":"s1","cwd":"/repo"}"#),
            &storage,
            100,
            now,
        )
        .unwrap();

        assert_eq!(outcome, Outcome::Removed);
        assert!(records(&storage).read("/repo", AgentType::Claude).unwrap().is_none());
        assert!(locks(&storage).get("/repo").unwrap().is_none());
    }

    #[test]
    fn test_stale_session_end_leaves_newer_session_alone() {
        let (_temp, storage) = fixture();
        let now = Utc::now();
        handle_hook_input(
            &input(r#"{"hook_event_name":"SessionStart","session_id":"A","cwd":"/repo"}"#),
            &storage,
            100,
            now,
        )
        .unwrap();
        handle_hook_input(
            &input(r#"{"hook_event_name":"UserPromptSubmit","session_id":"B","cwd":"/repo"}"#),
            &storage,
            200,
            now,
        )
        .unwrap();
        handle_hook_input(
            &input(r#"{"hook_event_name":"SessionEnd","session_id":"A","cwd":"/repo"}"#),
            &storage,
            100,
            now,
        )
        .unwrap();

        let record = records(&storage).read("/repo", AgentType::Claude).unwrap().unwrap();
        assert_eq!(record.session_id, "B");
        let lock = locks(&storage).get("/repo").unwrap().unwrap();
        assert_eq!(lock.holder_pid, 200);
        assert_eq!(lock.session_id, "B");
    }

    #[test]
    fn test_missing_session_or_cwd_is_skipped() {
        let (_temp, storage) = fixture();
        for json in [
            r#"{"hook_event_name":"SessionStart","cwd":"/repo"}"#,
            r#"{"hook_event_name":"SessionStart","session_id":"s1"}"#,
            r#"{"session_id":"s1","cwd":"/repo"}"#,
        ] {
            let (outcome, claim) =
                handle_hook_input(&input(json), &storage, 100, Utc::now()).unwrap();
            assert_eq!(outcome, Outcome::Skipped);
            assert!(claim.is_none());
        }
        assert!(records(&storage).load_all().unwrap().is_empty());
    }
}
