//! End-to-end orchestration tests over the public API
//!
//! Wires real arbiter, debouncer, signaling, and session actors together
//! over a recording transport, with paused time for determinism.

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use voxlink::capture::arbiter::run_arbiter;
use voxlink::capture::{KeyAction, KeyEvent, SourceEvent, SourceKind};
use voxlink::debounce;
use voxlink::error::{TokenFetchError, TransportError};
use voxlink::identity::{IdentityMapper, IdentityScheme};
use voxlink::session;
use voxlink::signaling::SignalingReceiver;
use voxlink::state::SessionState;
use voxlink::store::MemoryStore;
use voxlink::token::{Token, TokenFetcher, TokenProvider, TokenRequest};
use voxlink::transport::{AudioTransport, TransportEvent};
use voxlink::wake::NoopWakeHold;

/// Transport that records every call with the paused-clock time it arrived
struct RecordingTransport {
    calls: Mutex<Vec<(String, Instant)>>,
}

impl RecordingTransport {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, label: &str) {
        self.calls
            .lock()
            .unwrap()
            .push((label.to_string(), Instant::now()));
    }

    fn labels(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(label, _)| label.clone())
            .collect()
    }

    fn count(&self, label: &str) -> usize {
        self.labels().iter().filter(|l| *l == label).count()
    }

    fn time_of_last(&self, label: &str) -> Option<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(l, _)| l == label)
            .map(|(_, at)| *at)
    }
}

#[async_trait::async_trait]
impl AudioTransport for RecordingTransport {
    async fn join(&self, _channel: &str, _uid: u32, _token: &str) -> Result<(), TransportError> {
        self.record("join");
        Ok(())
    }

    async fn leave(&self) -> Result<(), TransportError> {
        self.record("leave");
        Ok(())
    }

    async fn set_transmit(&self, enabled: bool) -> Result<(), TransportError> {
        self.record(if enabled { "tx-on" } else { "tx-off" });
        Ok(())
    }

    async fn renew_token(&self, _token: &str) -> Result<(), TransportError> {
        self.record("renew");
        Ok(())
    }
}

struct StaticFetcher;

#[async_trait::async_trait]
impl TokenFetcher for StaticFetcher {
    async fn fetch(&self, request: &TokenRequest) -> Result<Token, TokenFetchError> {
        Ok(Token {
            channel: request.channel.clone(),
            uid: request.uid,
            value: "test-token".to_string(),
            expires_at: Utc::now() + ChronoDuration::hours(1),
        })
    }
}

fn spawn_session(
    transport: Arc<RecordingTransport>,
) -> (
    session::SessionHandle,
    tokio::sync::watch::Receiver<voxlink::state::SessionSnapshot>,
) {
    let tokens = Arc::new(TokenProvider::new(
        Arc::new(StaticFetcher),
        "default".to_string(),
        60,
    ));
    let (handle, state_rx, _task) = session::spawn(transport, tokens);
    (handle, state_rx)
}

/// Let spawned actors drain their queues under the paused clock
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn test_emergency_signal_joins_from_disconnected() {
    let transport = Arc::new(RecordingTransport::new());
    let (session, state_rx) = spawn_session(Arc::clone(&transport));

    let mapper = Arc::new(IdentityMapper::new(Arc::new(MemoryStore::new())));
    let local_uid = mapper
        .get_or_create_uid(IdentityScheme::Responder, "unit-12")
        .unwrap();
    let receiver = SignalingReceiver::new(
        Arc::clone(&mapper),
        IdentityScheme::Responder,
        "unit-12".to_string(),
    );

    // Emergency push from another device goes straight to the session,
    // no key press and no debounce window involved
    let cmd = receiver
        .handle_payload(&json!({
            "type": "emergency",
            "channel": "ops-east",
            "uid": "1000099",
            "emergencyType": "mayday",
        }))
        .expect("emergency signal should produce a command");
    assert!(cmd.emergency);

    session
        .auto_join(&cmd.channel, local_uid, cmd.sender_uid, &cmd.reason, cmd.emergency)
        .await
        .unwrap();
    settle().await;

    let snapshot = state_rx.borrow().clone();
    assert_eq!(snapshot.state, SessionState::Connected);
    assert_eq!(snapshot.channel.as_deref(), Some("ops-east"));
    assert_eq!(transport.count("join"), 1);
    // Joined but not transmitting until the operator presses the key
    assert_eq!(transport.count("tx-on"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_key_pipeline_reuses_connection_across_taps() {
    let transport = Arc::new(RecordingTransport::new());
    let (session, state_rx) = spawn_session(Arc::clone(&transport));

    let (debouncer, _task) = debounce::spawn(
        session.clone(),
        "ops-east".to_string(),
        2_000_417,
        Duration::from_millis(2000),
        Arc::new(NoopWakeHold),
        state_rx.clone(),
    );

    // Full capture path: raw source reports through the arbiter into the
    // debouncer, the way the daemon wires them
    let (source_tx, source_rx) = mpsc::channel::<SourceEvent>(16);
    let (events_tx, mut events_rx) = mpsc::channel::<KeyEvent>(16);
    tokio::spawn(run_arbiter(source_rx, events_tx));

    let pump_debouncer = debouncer.clone();
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                KeyEvent::Pressed { .. } => pump_debouncer.press().await,
                KeyEvent::Released { .. } => pump_debouncer.release().await,
            }
        }
    });

    let report = |action: KeyAction, source: SourceKind| {
        let tx = source_tx.clone();
        async move {
            tx.send(SourceEvent {
                control: "ptt".to_string(),
                source,
                action,
            })
            .await
            .unwrap();
        }
    };

    let start = Instant::now();

    // Tap: press at t=0, release at t=100ms
    report(KeyAction::Down, SourceKind::Hardware).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    report(KeyAction::Up, SourceKind::Hardware).await;

    // Press again at t=150ms, inside the teardown window
    tokio::time::sleep(Duration::from_millis(50)).await;
    report(KeyAction::Down, SourceKind::Hardware).await;
    settle().await;

    assert_eq!(transport.count("join"), 1, "second press must reuse the connection");
    assert_eq!(state_rx.borrow().state, SessionState::Transmitting);

    // Hold until t=2000ms, then release and wait out the window
    tokio::time::sleep(Duration::from_millis(1850)).await;
    report(KeyAction::Up, SourceKind::Hardware).await;
    tokio::time::sleep(Duration::from_millis(2100)).await;

    assert_eq!(transport.count("join"), 1);
    assert_eq!(transport.count("leave"), 1);
    assert_eq!(state_rx.borrow().state, SessionState::Disconnected);

    // Teardown fires one window after the last release (t=100ms + 2000ms is
    // superseded by the second press; the live window starts at t=2000ms)
    let leave_at = transport.time_of_last("leave").unwrap();
    let elapsed = leave_at.duration_since(start);
    assert!(
        elapsed >= Duration::from_millis(4000) && elapsed < Duration::from_millis(4200),
        "leave fired at {:?}",
        elapsed
    );
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_sources_produce_one_session() {
    let transport = Arc::new(RecordingTransport::new());
    let (session, state_rx) = spawn_session(Arc::clone(&transport));

    let (debouncer, _task) = debounce::spawn(
        session.clone(),
        "ops-east".to_string(),
        2_000_417,
        Duration::from_millis(2000),
        Arc::new(NoopWakeHold),
        state_rx.clone(),
    );

    let (source_tx, source_rx) = mpsc::channel::<SourceEvent>(16);
    let (events_tx, mut events_rx) = mpsc::channel::<KeyEvent>(16);
    tokio::spawn(run_arbiter(source_rx, events_tx));

    let pump_debouncer = debouncer.clone();
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                KeyEvent::Pressed { .. } => pump_debouncer.press().await,
                KeyEvent::Released { .. } => pump_debouncer.release().await,
            }
        }
    });

    let report = |action: KeyAction, source: SourceKind| {
        let tx = source_tx.clone();
        async move {
            tx.send(SourceEvent {
                control: "ptt".to_string(),
                source,
                action,
            })
            .await
            .unwrap();
        }
    };

    // Hardware key and media-route button both report the same hold
    report(KeyAction::Down, SourceKind::Hardware).await;
    report(KeyAction::Down, SourceKind::MediaRoute).await;
    settle().await;

    assert_eq!(transport.count("join"), 1);
    assert_eq!(transport.count("tx-on"), 1);

    // One path releasing keeps the transmission alive
    report(KeyAction::Up, SourceKind::Hardware).await;
    settle().await;
    assert_eq!(state_rx.borrow().state, SessionState::Transmitting);
    assert_eq!(transport.count("tx-off"), 0);

    // Last path releasing stops transmit and arms the teardown window
    report(KeyAction::Up, SourceKind::MediaRoute).await;
    settle().await;
    assert_eq!(transport.count("tx-off"), 1);
    assert_eq!(state_rx.borrow().state, SessionState::Connected);

    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert_eq!(transport.count("leave"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connection_loss_recovers_on_next_press() {
    let transport = Arc::new(RecordingTransport::new());
    let (session, state_rx) = spawn_session(Arc::clone(&transport));

    let (debouncer, _task) = debounce::spawn(
        session.clone(),
        "ops-east".to_string(),
        2_000_417,
        Duration::from_millis(2000),
        Arc::new(NoopWakeHold),
        state_rx.clone(),
    );

    debouncer.press().await;
    settle().await;
    assert_eq!(state_rx.borrow().state, SessionState::Transmitting);

    // The engine loses the session while the key is held
    session
        .transport_event(TransportEvent::ConnectionLost(
            TransportError::NetworkInterrupted,
        ))
        .await
        .unwrap();
    settle().await;

    // The drop-out resolved back to Disconnected, not a wedged Error
    assert_eq!(state_rx.borrow().state, SessionState::Disconnected);
    assert_eq!(transport.count("leave"), 1);

    // Re-keying opens a fresh connection and transmits again
    debouncer.release().await;
    debouncer.press().await;
    settle().await;

    assert_eq!(transport.count("join"), 2);
    assert_eq!(state_rx.borrow().state, SessionState::Transmitting);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_path_disconnects_immediately() {
    let transport = Arc::new(RecordingTransport::new());
    let (session, state_rx) = spawn_session(Arc::clone(&transport));

    let (debouncer, _task) = debounce::spawn(
        session.clone(),
        "ops-east".to_string(),
        2_000_417,
        Duration::from_millis(2000),
        Arc::new(NoopWakeHold),
        state_rx.clone(),
    );

    debouncer.press().await;
    debouncer.release().await;
    settle().await;
    assert_eq!(state_rx.borrow().state, SessionState::Connected);

    // Shutdown must not wait out the two-second window
    debouncer.force_disconnect().await;
    session.shutdown().await.unwrap();

    assert_eq!(transport.count("leave"), 1);
    assert_eq!(state_rx.borrow().state, SessionState::Disconnected);
}
