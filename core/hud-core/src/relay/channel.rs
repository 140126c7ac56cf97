//! Relay channel: one worker thread that owns the socket.
//!
//! The engine talks to the worker through two mpsc queues and never blocks on
//! it. Outbound, the engine publishes reconciled local states; the channel
//! forwards a sealed snapshot only when something changed, plus heartbeats for
//! projects that are `Working`. Inbound, the worker decrypts snapshots and passes
//! them back as [`RelayEvent`]s for the engine to fold into its mirror.
//!
//! ```text
//! engine ──publish()──► outbound queue ──► worker ──► relay
//! engine ◄──drain()──── event queue ◄──── worker ◄── relay
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use capacitor_relay_protocol::{
    parse_envelope, Envelope, Heartbeat, MessageType, RemoteProjectState, RemoteSnapshot,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::backoff::Backoff;
use super::crypto::RelayCipher;
use super::transport::RelayTransport;
use super::{ConnectionStatus, RelayError};
use crate::config::RelayCredentials;
use crate::types::{ReconciledState, SessionState, StateOrigin};

/// Something the worker observed, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Status(ConnectionStatus),
    Snapshot(RemoteSnapshot),
    Heartbeat(Heartbeat),
}

enum Outbound {
    Snapshot(RemoteSnapshot),
    Heartbeat(Heartbeat),
    Shutdown,
}

/// Worker timing. Defaults suit a real relay; tests shrink them.
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub poll_interval: Duration,
    pub ping_interval: Duration,
    pub backoff: Backoff,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            ping_interval: Duration::from_secs(30),
            backoff: Backoff::default(),
        }
    }
}

/// What was last published per project, minus timestamps.
type Published = BTreeMap<String, (SessionState, Option<String>)>;

pub struct RelayChannel {
    outbound: Sender<Outbound>,
    events: Receiver<RelayEvent>,
    status: ConnectionStatus,
    published: Option<Published>,
    heartbeats_sent: HashMap<String, DateTime<Utc>>,
    heartbeat_interval: chrono::Duration,
    device_id: String,
    // Dropped without joining on shutdown.
    _worker: JoinHandle<()>,
}

impl RelayChannel {
    /// Starts the worker. Fails only when the credential itself is unusable.
    pub fn spawn(
        credentials: &RelayCredentials,
        transport: Box<dyn RelayTransport>,
        heartbeat_interval: chrono::Duration,
        options: ChannelOptions,
    ) -> Result<Self, RelayError> {
        let cipher = RelayCipher::from_base64(&credentials.secret_key)?;
        if credentials.device_id.trim().is_empty() {
            return Err(RelayError::InvalidKey("device id is empty".to_string()));
        }

        let (outbound_tx, outbound_rx) = mpsc::channel();
        let (events_tx, events_rx) = mpsc::channel();
        let worker = Worker {
            url: relay_endpoint(&credentials.relay_url, &credentials.device_id),
            device_id: credentials.device_id.clone(),
            cipher,
            transport,
            outbound: outbound_rx,
            events: events_tx,
            latest: None,
            options,
        };

        let handle = thread::Builder::new()
            .name("capacitor-relay".to_string())
            .spawn(move || worker.run())
            .map_err(|err| RelayError::Transport(err.to_string()))?;

        Ok(Self {
            outbound: outbound_tx,
            events: events_rx,
            status: ConnectionStatus::Connecting,
            published: None,
            heartbeats_sent: HashMap::new(),
            heartbeat_interval,
            device_id: credentials.device_id.clone(),
            _worker: handle,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Queues outbound traffic for this refresh. Remote-origin states are never
    /// echoed back.
    pub fn publish(&mut self, states: &[ReconciledState], now: DateTime<Utc>) {
        let local: Vec<&ReconciledState> = states
            .iter()
            .filter(|s| s.origin == StateOrigin::Local)
            .collect();

        let published: Published = local
            .iter()
            .map(|s| (s.project.path.clone(), (s.state, s.working_on.clone())))
            .collect();
        if self.published.as_ref() != Some(&published) {
            let snapshot = local_snapshot(&local, now);
            if self.outbound.send(Outbound::Snapshot(snapshot)).is_ok() {
                self.published = Some(published);
            }
        }

        self.heartbeats_sent.retain(|path, _| {
            local
                .iter()
                .any(|s| &s.project.path == path && s.state == SessionState::Working)
        });
        for state in local.iter().filter(|s| s.state == SessionState::Working) {
            let due = self
                .heartbeats_sent
                .get(&state.project.path)
                .map_or(true, |last| now - *last >= self.heartbeat_interval);
            if !due {
                continue;
            }
            let heartbeat = Heartbeat::new(state.project.path.clone(), now);
            if self.outbound.send(Outbound::Heartbeat(heartbeat)).is_ok() {
                self.heartbeats_sent.insert(state.project.path.clone(), now);
            }
        }
    }

    /// Everything the worker has reported since the last call.
    pub fn drain(&mut self) -> Vec<RelayEvent> {
        let mut drained = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    if let RelayEvent::Status(status) = &event {
                        self.status = *status;
                    }
                    drained.push(event);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.status != ConnectionStatus::Disconnected {
                        self.status = ConnectionStatus::Disconnected;
                        drained.push(RelayEvent::Status(ConnectionStatus::Disconnected));
                    }
                    break;
                }
            }
        }
        drained
    }

    /// Asks the worker to close the socket and stop. Does not wait for it.
    pub fn shutdown(&mut self) {
        let _ = self.outbound.send(Outbound::Shutdown);
        self.status = ConnectionStatus::Disconnected;
    }
}

impl Drop for RelayChannel {
    fn drop(&mut self) {
        let _ = self.outbound.send(Outbound::Shutdown);
    }
}

/// `{relay_url}/{device_id}` without doubling the slash.
pub fn relay_endpoint(relay_url: &str, device_id: &str) -> String {
    format!("{}/{}", relay_url.trim_end_matches('/'), device_id)
}

/// Wire form of the local states. Projects without a recorded state change are
/// stamped with `now`.
pub fn local_snapshot(states: &[&ReconciledState], now: DateTime<Utc>) -> RemoteSnapshot {
    states
        .iter()
        .map(|s| {
            (
                s.project.path.clone(),
                RemoteProjectState {
                    state: s.state.into(),
                    working_on: s.working_on.clone(),
                    next_step: None,
                    context_percent: None,
                    last_updated: s
                        .state_changed_at
                        .clone()
                        .unwrap_or_else(|| now.to_rfc3339()),
                },
            )
        })
        .collect()
}

// -----------------------------------------------------------------------------
// Worker
// -----------------------------------------------------------------------------

enum SessionEnd {
    Shutdown,
    Lost(RelayError),
}

struct Worker {
    url: String,
    device_id: String,
    cipher: RelayCipher,
    transport: Box<dyn RelayTransport>,
    outbound: Receiver<Outbound>,
    events: Sender<RelayEvent>,
    /// Resent after every reconnect so the peer catches up.
    latest: Option<RemoteSnapshot>,
    options: ChannelOptions,
}

impl Worker {
    fn run(mut self) {
        loop {
            self.report(ConnectionStatus::Connecting);
            match self.transport.connect(&self.url) {
                Ok(()) => {
                    self.options.backoff.reset();
                    info!(url = %self.url, "Relay connected");
                    match self.session() {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Lost(err) => {
                            warn!(error = %err, "Relay connection lost");
                            self.transport.close();
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, url = %self.url, "Relay connect failed");
                }
            }

            self.report(ConnectionStatus::Disconnected);
            let delay = self.options.backoff.next_delay();
            debug!(delay_ms = delay.as_millis() as u64, "Relay reconnect scheduled");
            if self.wait(delay) {
                break;
            }
        }
        self.transport.close();
        debug!("Relay worker stopped");
    }

    /// Sleeps for `delay` while still taking outbound messages. Returns true when
    /// shutdown was requested.
    fn wait(&mut self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match self.outbound.recv_timeout(remaining) {
                Ok(Outbound::Snapshot(snapshot)) => self.latest = Some(snapshot),
                // Heartbeats are only meaningful live.
                Ok(Outbound::Heartbeat(_)) => {}
                Ok(Outbound::Shutdown) | Err(RecvTimeoutError::Disconnected) => return true,
                Err(RecvTimeoutError::Timeout) => return false,
            }
        }
    }

    fn session(&mut self) -> SessionEnd {
        if let Err(err) = self.send(&Envelope::hello(&self.device_id)) {
            return SessionEnd::Lost(err);
        }
        self.report(ConnectionStatus::Connected);

        if let Some(snapshot) = self.latest.clone() {
            if let Err(err) = self.send_snapshot(&snapshot) {
                return SessionEnd::Lost(err);
            }
        }

        let mut last_ping = Instant::now();
        loop {
            loop {
                match self.outbound.try_recv() {
                    Ok(Outbound::Snapshot(snapshot)) => {
                        let result = self.send_snapshot(&snapshot);
                        self.latest = Some(snapshot);
                        if let Err(err) = result {
                            return SessionEnd::Lost(err);
                        }
                    }
                    Ok(Outbound::Heartbeat(heartbeat)) => {
                        if let Err(err) =
                            self.send(&Envelope::heartbeat(&self.device_id, heartbeat))
                        {
                            return SessionEnd::Lost(err);
                        }
                    }
                    Ok(Outbound::Shutdown) | Err(TryRecvError::Disconnected) => {
                        return SessionEnd::Shutdown
                    }
                    Err(TryRecvError::Empty) => break,
                }
            }

            if last_ping.elapsed() >= self.options.ping_interval {
                if let Err(err) = self.send(&Envelope::ping()) {
                    return SessionEnd::Lost(err);
                }
                last_ping = Instant::now();
            }

            match self.transport.recv(self.options.poll_interval) {
                Ok(Some(text)) => {
                    if let Err(err) = self.handle_frame(&text) {
                        return SessionEnd::Lost(err);
                    }
                }
                Ok(None) => {}
                Err(err) => return SessionEnd::Lost(err),
            }
        }
    }

    /// Only transport failures propagate; bad frames are logged and dropped.
    fn handle_frame(&mut self, text: &str) -> Result<(), RelayError> {
        let envelope = match parse_envelope(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(code = %err.code, error = %err.message, "Dropping malformed relay frame");
                return Ok(());
            }
        };

        match envelope.kind {
            MessageType::StateUpdate => {
                let Some(state) = envelope.state.as_ref() else {
                    return Ok(());
                };
                match self.cipher.open(state) {
                    Ok(snapshot) => {
                        debug!(projects = snapshot.len(), "Remote snapshot received");
                        self.report(ConnectionStatus::Connected);
                        self.emit(RelayEvent::Snapshot(snapshot));
                    }
                    Err(err @ RelayError::Decrypt(_)) => {
                        warn!(error = %err, "Remote snapshot failed authentication");
                        self.report(ConnectionStatus::Tampering);
                    }
                    Err(err) => {
                        warn!(error = %err, "Remote snapshot could not be decoded");
                    }
                }
            }
            MessageType::Heartbeat => {
                if let Some(heartbeat) = envelope.heartbeat {
                    self.emit(RelayEvent::Heartbeat(heartbeat));
                }
            }
            MessageType::Ping => self.send(&Envelope::pong())?,
            MessageType::Pong | MessageType::Hello => {
                debug!(kind = ?envelope.kind, "Relay control frame");
            }
            MessageType::Command => {
                info!("Ignoring relay command; remote control is not supported");
            }
        }
        Ok(())
    }

    fn send_snapshot(&mut self, snapshot: &RemoteSnapshot) -> Result<(), RelayError> {
        let sealed = match self.cipher.seal(snapshot) {
            Ok(sealed) => sealed,
            Err(err) => {
                warn!(error = %err, "Failed to seal snapshot");
                return Ok(());
            }
        };
        self.send(&Envelope::state_update(&self.device_id, sealed))
    }

    fn send(&mut self, envelope: &Envelope) -> Result<(), RelayError> {
        let text = envelope
            .to_json()
            .map_err(|err| RelayError::Protocol(err.to_string()))?;
        self.transport.send(&text)
    }

    fn report(&self, status: ConnectionStatus) {
        self.emit(RelayEvent::Status(status));
    }

    fn emit(&self, event: RelayEvent) {
        // The engine may already be gone during shutdown.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::MemoryTransport;
    use crate::types::Project;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use capacitor_relay_protocol::RemoteState;

    fn credentials() -> RelayCredentials {
        RelayCredentials {
            device_id: "dev-1".to_string(),
            secret_key: STANDARD.encode([9u8; 32]),
            relay_url: "wss://relay.example/".to_string(),
        }
    }

    fn fast_options() -> ChannelOptions {
        ChannelOptions {
            poll_interval: Duration::from_millis(5),
            ping_interval: Duration::from_secs(3600),
            backoff: Backoff::new(Duration::from_millis(5), Duration::from_millis(20)),
        }
    }

    fn spawn(handle: &MemoryTransport) -> RelayChannel {
        RelayChannel::spawn(
            &credentials(),
            Box::new(handle.clone()),
            chrono::Duration::seconds(15),
            fast_options(),
        )
        .unwrap()
    }

    fn state(path: &str, lifecycle: SessionState) -> ReconciledState {
        ReconciledState {
            project: Project::from_path(path),
            state: lifecycle,
            is_locked: true,
            flashing: false,
            origin: StateOrigin::Local,
            session_id: Some("s1".to_string()),
            agent_type: Some("claude".to_string()),
            working_on: None,
            state_changed_at: Some("2026-01-01T00:00:00+00:00".to_string()),
        }
    }

    fn wait_for<F: Fn() -> bool>(condition: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for relay worker");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn sent_kinds(handle: &MemoryTransport) -> Vec<MessageType> {
        handle
            .sent()
            .iter()
            .filter_map(|text| serde_json::from_str::<Envelope>(text).ok())
            .map(|envelope| envelope.kind)
            .collect()
    }

    fn collect_until<F: Fn(&RelayEvent) -> bool>(
        channel: &mut RelayChannel,
        done: F,
    ) -> Vec<RelayEvent> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = Vec::new();
        loop {
            let batch = channel.drain();
            let finished = batch.iter().any(&done);
            seen.extend(batch);
            if finished {
                return seen;
            }
            assert!(Instant::now() < deadline, "timed out waiting for relay event");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_connects_to_device_endpoint_and_says_hello() {
        let handle = MemoryTransport::new();
        let mut channel = spawn(&handle);
        collect_until(&mut channel, |e| {
            *e == RelayEvent::Status(ConnectionStatus::Connected)
        });

        assert_eq!(handle.urls()[0], "wss://relay.example/dev-1");
        assert_eq!(sent_kinds(&handle)[0], MessageType::Hello);
        assert_eq!(channel.status(), ConnectionStatus::Connected);
        channel.shutdown();
    }

    #[test]
    fn test_snapshot_sent_only_on_change() {
        let handle = MemoryTransport::new();
        let mut channel = spawn(&handle);
        let now = Utc::now();

        let states = vec![state("/repo", SessionState::Ready)];
        channel.publish(&states, now);
        channel.publish(&states, now);
        wait_for(|| sent_kinds(&handle).contains(&MessageType::StateUpdate));

        let changed = vec![state("/repo", SessionState::Working)];
        channel.publish(&changed, now);
        wait_for(|| {
            sent_kinds(&handle)
                .iter()
                .filter(|k| **k == MessageType::StateUpdate)
                .count()
                == 2
        });
        channel.shutdown();
    }

    #[test]
    fn test_heartbeats_are_rate_limited() {
        let handle = MemoryTransport::new();
        let mut channel = spawn(&handle);
        let now = Utc::now();
        let states = vec![state("/repo", SessionState::Working)];

        channel.publish(&states, now);
        channel.publish(&states, now + chrono::Duration::seconds(5));
        channel.publish(&states, now + chrono::Duration::seconds(15));
        wait_for(|| {
            sent_kinds(&handle)
                .iter()
                .filter(|k| **k == MessageType::Heartbeat)
                .count()
                == 2
        });
        thread::sleep(Duration::from_millis(30));
        let heartbeats = sent_kinds(&handle)
            .iter()
            .filter(|k| **k == MessageType::Heartbeat)
            .count();
        assert_eq!(heartbeats, 2);
        channel.shutdown();
    }

    #[test]
    fn test_remote_states_are_not_echoed() {
        let handle = MemoryTransport::new();
        let mut channel = spawn(&handle);
        let mut remote = state("/repo", SessionState::Working);
        remote.origin = StateOrigin::Remote;

        channel.publish(&[remote.clone()], Utc::now());
        wait_for(|| sent_kinds(&handle).contains(&MessageType::StateUpdate));
        let sealed = handle
            .sent()
            .iter()
            .filter_map(|t| serde_json::from_str::<Envelope>(t).ok())
            .find(|e| e.kind == MessageType::StateUpdate)
            .and_then(|e| e.state)
            .unwrap();
        let cipher = RelayCipher::from_base64(&credentials().secret_key).unwrap();
        assert!(cipher.open(&sealed).unwrap().is_empty());
        assert!(!sent_kinds(&handle).contains(&MessageType::Heartbeat));
        channel.shutdown();
    }

    #[test]
    fn test_inbound_snapshot_is_decrypted() {
        let handle = MemoryTransport::new();
        let mut channel = spawn(&handle);
        let cipher = RelayCipher::from_base64(&credentials().secret_key).unwrap();
        let mut snapshot = RemoteSnapshot::new();
        snapshot.insert(
            "/repo".to_string(),
            RemoteProjectState {
                state: RemoteState::Working,
                working_on: None,
                next_step: None,
                context_percent: None,
                last_updated: Utc::now().to_rfc3339(),
            },
        );
        let frame = Envelope::state_update("peer", cipher.seal(&snapshot).unwrap())
            .to_json()
            .unwrap();
        handle.push_inbound(frame);

        let events = collect_until(&mut channel, |e| matches!(e, RelayEvent::Snapshot(_)));
        assert!(events.contains(&RelayEvent::Snapshot(snapshot)));
        channel.shutdown();
    }

    #[test]
    fn test_foreign_key_flags_tampering() {
        let handle = MemoryTransport::new();
        let mut channel = spawn(&handle);
        let other = RelayCipher::from_bytes(&[1u8; 32]).unwrap();
        let frame = Envelope::state_update("peer", other.seal(&RemoteSnapshot::new()).unwrap())
            .to_json()
            .unwrap();
        handle.push_inbound(frame);

        let events = collect_until(&mut channel, |e| {
            *e == RelayEvent::Status(ConnectionStatus::Tampering)
        });
        assert!(!events.iter().any(|e| matches!(e, RelayEvent::Snapshot(_))));
        assert_eq!(channel.status(), ConnectionStatus::Tampering);
        channel.shutdown();
    }

    #[test]
    fn test_inbound_ping_is_answered() {
        let handle = MemoryTransport::new();
        let mut channel = spawn(&handle);
        handle.push_inbound(Envelope::ping().to_json().unwrap());
        wait_for(|| sent_kinds(&handle).contains(&MessageType::Pong));
        channel.shutdown();
    }

    #[test]
    fn test_reconnects_and_resends_latest_snapshot() {
        let handle = MemoryTransport::new();
        handle.refuse_connects(2);
        let mut channel = spawn(&handle);
        channel.publish(&[state("/repo", SessionState::Ready)], Utc::now());

        wait_for(|| handle.is_connected());
        assert_eq!(handle.connect_attempts(), 3);
        wait_for(|| sent_kinds(&handle).contains(&MessageType::StateUpdate));

        handle.drop_connection();
        wait_for(|| {
            handle.connect_attempts() == 4
                && sent_kinds(&handle)
                    .iter()
                    .filter(|k| **k == MessageType::StateUpdate)
                    .count()
                    == 2
        });
        channel.shutdown();
    }

    #[test]
    fn test_invalid_key_fails_fast() {
        let mut creds = credentials();
        creds.secret_key = "short".to_string();
        let result = RelayChannel::spawn(
            &creds,
            Box::new(MemoryTransport::new()),
            chrono::Duration::seconds(15),
            fast_options(),
        );
        assert!(matches!(result, Err(RelayError::InvalidKey(_))));
    }

    #[test]
    fn test_endpoint_joins_without_double_slash() {
        assert_eq!(relay_endpoint("wss://r/", "d"), "wss://r/d");
        assert_eq!(relay_endpoint("wss://r", "d"), "wss://r/d");
    }
}
