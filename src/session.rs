//! Session state machine actor
//!
//! Owns the process-wide transport session and is the only caller of the
//! transport primitives. All commands (local joins, remote auto-joins,
//! transmit toggles, token refresh, engine events) arrive on one mpsc
//! queue and are processed strictly one at a time, so a join in flight
//! always settles before the next desired-state change applies. That queue
//! is the busy guard: concurrent callers are serialized, never dropped.
//!
//! State transitions:
//! Disconnected → Connecting → Connected ⇄ Transmitting → Disconnected,
//! with Error reachable from any in-flight state and left only by explicit
//! retry or leave.

use crate::error::{TokenFetchError, TransportError, VoxlinkError};
use crate::identity::IdentityScheme;
use crate::state::{ErrorInfo, Session, SessionSnapshot, SessionState};
use crate::token::TokenProvider;
use crate::transport::AudioTransport;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};

/// Command queue depth; events from three execution contexts fan in here
const COMMAND_BUFFER: usize = 64;

/// Token fetch attempts per join, with backoff between them
const TOKEN_FETCH_ATTEMPTS: u32 = 3;
const TOKEN_FETCH_BACKOFF: Duration = Duration::from_millis(200);

/// Result of a transmit request
///
/// `NotConnected` is a signal, not an error: transmit requests can
/// legitimately race session teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitOutcome {
    Started,
    Stopped,
    NotConnected,
}

/// Commands accepted by the session actor
#[derive(Debug)]
pub enum SessionCommand {
    Join {
        channel: String,
        uid: u32,
        reply: Option<oneshot::Sender<Result<(), VoxlinkError>>>,
    },
    AutoJoin {
        channel: String,
        uid: u32,
        sender_uid: u32,
        reason: String,
        emergency: bool,
        reply: Option<oneshot::Sender<Result<(), VoxlinkError>>>,
    },
    Leave {
        reply: Option<oneshot::Sender<()>>,
    },
    StartTransmit {
        reply: Option<oneshot::Sender<TransmitOutcome>>,
    },
    StopTransmit {
        reply: Option<oneshot::Sender<TransmitOutcome>>,
    },
    /// Engine notice: the session token is about to expire
    TokenWillExpire,
    /// Engine notice: the session is gone unrecoverably
    ConnectionLost(TransportError),
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to the session actor
///
/// This is the session control surface exposed to the host layer; pair it
/// with the watch receiver from [`spawn`] for the observable state stream.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    /// Build a handle around a raw command channel
    pub fn new(tx: mpsc::Sender<SessionCommand>) -> Self {
        Self { tx }
    }

    /// Join a channel and wait for the outcome
    pub async fn join(&self, channel: &str, uid: u32) -> Result<(), VoxlinkError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(SessionCommand::Join {
            channel: channel.to_string(),
            uid,
            reply: Some(reply_tx),
        })
        .await?;
        reply_rx.await.map_err(|_| VoxlinkError::SessionGone)?
    }

    /// Join a channel without waiting (used by the debouncer's connect intent)
    pub async fn connect(&self, channel: &str, uid: u32) -> Result<(), VoxlinkError> {
        self.send(SessionCommand::Join {
            channel: channel.to_string(),
            uid,
            reply: None,
        })
        .await
    }

    /// Remote-initiated join; the reason is surfaced to logs for audit
    pub async fn auto_join(
        &self,
        channel: &str,
        uid: u32,
        sender_uid: u32,
        reason: &str,
        emergency: bool,
    ) -> Result<(), VoxlinkError> {
        self.send(SessionCommand::AutoJoin {
            channel: channel.to_string(),
            uid,
            sender_uid,
            reason: reason.to_string(),
            emergency,
            reply: None,
        })
        .await
    }

    /// Leave the current channel and wait until torn down
    pub async fn leave(&self) -> Result<(), VoxlinkError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(SessionCommand::Leave {
            reply: Some(reply_tx),
        })
        .await?;
        reply_rx.await.map_err(|_| VoxlinkError::SessionGone)
    }

    /// Leave without waiting (used by the debouncer's disconnect intent)
    pub async fn disconnect(&self) -> Result<(), VoxlinkError> {
        self.send(SessionCommand::Leave { reply: None }).await
    }

    pub async fn start_transmit(&self) -> Result<TransmitOutcome, VoxlinkError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(SessionCommand::StartTransmit {
            reply: Some(reply_tx),
        })
        .await?;
        reply_rx.await.map_err(|_| VoxlinkError::SessionGone)
    }

    pub async fn stop_transmit(&self) -> Result<TransmitOutcome, VoxlinkError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(SessionCommand::StopTransmit {
            reply: Some(reply_tx),
        })
        .await?;
        reply_rx.await.map_err(|_| VoxlinkError::SessionGone)
    }

    /// Fire-and-forget transmit toggle (debouncer path)
    pub async fn transmit(&self, enabled: bool) -> Result<(), VoxlinkError> {
        let cmd = if enabled {
            SessionCommand::StartTransmit { reply: None }
        } else {
            SessionCommand::StopTransmit { reply: None }
        };
        self.send(cmd).await
    }

    /// Forward an engine event into the actor
    pub async fn transport_event(&self, event: crate::transport::TransportEvent) -> Result<(), VoxlinkError> {
        use crate::transport::TransportEvent;
        let cmd = match event {
            TransportEvent::TokenWillExpire => SessionCommand::TokenWillExpire,
            TransportEvent::ConnectionLost(e) => SessionCommand::ConnectionLost(e),
        };
        self.send(cmd).await
    }

    /// Settle any in-flight operation, leave, and stop the actor
    pub async fn shutdown(&self) -> Result<(), VoxlinkError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(SessionCommand::Shutdown { reply: reply_tx })
            .await?;
        reply_rx.await.map_err(|_| VoxlinkError::SessionGone)
    }

    async fn send(&self, cmd: SessionCommand) -> Result<(), VoxlinkError> {
        self.tx.send(cmd).await.map_err(|_| VoxlinkError::SessionGone)
    }
}

/// Spawn the session actor
///
/// Returns the control handle, the observable state stream, and the actor's
/// join handle (awaited by the daemon after shutdown).
pub fn spawn(
    transport: Arc<dyn AudioTransport>,
    tokens: Arc<TokenProvider>,
) -> (
    SessionHandle,
    watch::Receiver<SessionSnapshot>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
    let (state_tx, state_rx) = watch::channel(SessionSnapshot::disconnected());

    let actor = SessionActor {
        transport,
        tokens,
        session: Session::new(),
        state_tx,
        rx,
    };

    let task = tokio::spawn(actor.run());
    (SessionHandle::new(tx), state_rx, task)
}

struct SessionActor {
    transport: Arc<dyn AudioTransport>,
    tokens: Arc<TokenProvider>,
    session: Session,
    state_tx: watch::Sender<SessionSnapshot>,
    rx: mpsc::Receiver<SessionCommand>,
}

impl SessionActor {
    async fn run(mut self) {
        tracing::debug!("Session actor running");

        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                SessionCommand::Join { channel, uid, reply } => {
                    let result = self.handle_join(&channel, uid).await;
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                }
                SessionCommand::AutoJoin {
                    channel,
                    uid,
                    sender_uid,
                    reason,
                    emergency,
                    reply,
                } => {
                    tracing::info!(
                        "Auto-join requested: channel {:?}, sender uid {} ({}), reason {:?}{}",
                        channel,
                        sender_uid,
                        IdentityScheme::of_uid(sender_uid)
                            .map(|s| s.as_str())
                            .unwrap_or("unknown role"),
                        reason,
                        if emergency { " [EMERGENCY]" } else { "" }
                    );
                    let result = self.handle_join(&channel, uid).await;
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                }
                SessionCommand::Leave { reply } => {
                    self.handle_leave().await;
                    if let Some(reply) = reply {
                        let _ = reply.send(());
                    }
                }
                SessionCommand::StartTransmit { reply } => {
                    let outcome = self.handle_transmit(true).await;
                    if let Some(reply) = reply {
                        let _ = reply.send(outcome);
                    }
                }
                SessionCommand::StopTransmit { reply } => {
                    let outcome = self.handle_transmit(false).await;
                    if let Some(reply) = reply {
                        let _ = reply.send(outcome);
                    }
                }
                SessionCommand::TokenWillExpire => {
                    self.handle_token_refresh().await;
                }
                SessionCommand::ConnectionLost(error) => {
                    self.handle_connection_lost(error);
                }
                SessionCommand::Shutdown { reply } => {
                    // Any in-flight join already settled (commands are
                    // processed one at a time); tear down and stop.
                    if self.session.state.is_joined() || self.session.state == SessionState::Connecting {
                        self.handle_leave().await;
                    }
                    let _ = reply.send(());
                    break;
                }
            }
        }

        tracing::debug!("Session actor stopped");
    }

    fn set_state(&mut self, state: SessionState) {
        if self.session.state != state {
            tracing::info!("Session state: {} -> {}", self.session.state, state);
            self.session.state = state;
        }
        let _ = self.state_tx.send(self.session.snapshot());
    }

    fn fail(&mut self, message: String) {
        tracing::error!("Session error: {}", message);
        self.session.last_error = Some(ErrorInfo { message });
        self.session.connected_at = None;
        self.set_state(SessionState::Error);
    }

    async fn handle_join(&mut self, channel: &str, uid: u32) -> Result<(), VoxlinkError> {
        // Idempotent: already on (or connecting to) this channel as this uid
        if self.session.channel.as_deref() == Some(channel)
            && self.session.local_uid == Some(uid)
            && matches!(
                self.session.state,
                SessionState::Connecting | SessionState::Connected | SessionState::Transmitting
            )
        {
            tracing::debug!("Join no-op: already on channel {:?} as uid {}", channel, uid);
            return Ok(());
        }

        // Desired state changed while joined elsewhere: tear down first
        if self.session.state.is_joined() {
            tracing::info!(
                "Leaving channel {:?} to join {:?}",
                self.session.channel.as_deref().unwrap_or("?"),
                channel
            );
            self.handle_leave().await;
        }

        self.session.channel = Some(channel.to_string());
        self.session.local_uid = Some(uid);
        self.session.last_error = None;
        self.set_state(SessionState::Connecting);

        let token = match self.fetch_token_with_backoff(channel, uid, false).await {
            Ok(token) => token,
            Err(e) => {
                self.fail(format!("token fetch failed: {}", e));
                return Err(e.into());
            }
        };

        match self.transport.join(channel, uid, &token.value).await {
            Ok(()) => {
                self.session.connected_at = Some(Instant::now());
                self.set_state(SessionState::Connected);
                tracing::info!("Joined channel {:?} as uid {}", channel, uid);
                Ok(())
            }
            Err(e) => {
                self.fail(format!("transport join failed: {}", e));
                Err(e.into())
            }
        }
    }

    /// Leave is best-effort: the session is marked Disconnected even if the
    /// transport call fails, so the engine can never wedge the state machine.
    async fn handle_leave(&mut self) {
        if self.session.state == SessionState::Transmitting {
            if let Err(e) = self.transport.set_transmit(false).await {
                tracing::warn!("Stop transmit during leave failed: {}", e);
            }
            self.set_state(SessionState::Connected);
        }

        if let Err(e) = self.transport.leave().await {
            tracing::warn!("Transport leave failed (ignored): {}", e);
        }

        self.session.channel = None;
        self.session.local_uid = None;
        self.session.connected_at = None;
        self.session.last_error = None;
        self.set_state(SessionState::Disconnected);
    }

    async fn handle_transmit(&mut self, enabled: bool) -> TransmitOutcome {
        match (self.session.state, enabled) {
            (SessionState::Connected, true) => match self.transport.set_transmit(true).await {
                Ok(()) => {
                    self.set_state(SessionState::Transmitting);
                    TransmitOutcome::Started
                }
                Err(e) => {
                    self.fail(format!("start transmit failed: {}", e));
                    TransmitOutcome::NotConnected
                }
            },
            (SessionState::Transmitting, true) => TransmitOutcome::Started,
            (SessionState::Transmitting, false) => match self.transport.set_transmit(false).await {
                Ok(()) => {
                    // Transmitting always steps back to Connected
                    self.set_state(SessionState::Connected);
                    TransmitOutcome::Stopped
                }
                Err(e) => {
                    self.fail(format!("stop transmit failed: {}", e));
                    TransmitOutcome::NotConnected
                }
            },
            (SessionState::Connected, false) => TransmitOutcome::Stopped,
            _ => {
                tracing::debug!(
                    "Transmit request ({}) ignored in state {}",
                    enabled,
                    self.session.state
                );
                TransmitOutcome::NotConnected
            }
        }
    }

    /// Renew the token on the live session; on failure, leave and make
    /// exactly one rejoin attempt before surfacing Error.
    async fn handle_token_refresh(&mut self) {
        if !self.session.state.is_joined() {
            tracing::debug!("Token expiry notice ignored: not joined");
            return;
        }

        let (channel, uid) = match (self.session.channel.clone(), self.session.local_uid) {
            (Some(channel), Some(uid)) => (channel, uid),
            _ => return,
        };

        tracing::info!("Token expiry imminent, refreshing for channel {:?}", channel);

        let renewed = match self.tokens.get_token(&channel, uid, true).await {
            Ok(token) => self.transport.renew_token(&token.value).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match renewed {
            Ok(()) => {
                tracing::info!("Token renewed in place");
            }
            Err(e) => {
                tracing::warn!("Token renewal failed ({}), rejoining once", e);
                let was_transmitting = self.session.state == SessionState::Transmitting;
                self.handle_leave().await;

                if let Err(e) = self.handle_join(&channel, uid).await {
                    tracing::error!("Rejoin after token failure also failed: {}", e);
                    // handle_join already surfaced the Error state
                    return;
                }
                if was_transmitting {
                    self.handle_transmit(true).await;
                }
            }
        }
    }

    fn handle_connection_lost(&mut self, error: TransportError) {
        match self.session.state {
            SessionState::Connecting | SessionState::Connected | SessionState::Transmitting => {
                self.fail(format!("connection lost: {}", error));
            }
            _ => {
                tracing::debug!("Connection-lost notice ignored in state {}", self.session.state);
            }
        }
    }

    async fn fetch_token_with_backoff(
        &self,
        channel: &str,
        uid: u32,
        force: bool,
    ) -> Result<crate::token::Token, TokenFetchError> {
        let mut backoff = TOKEN_FETCH_BACKOFF;
        let mut last_err = None;

        for attempt in 1..=TOKEN_FETCH_ATTEMPTS {
            match self.tokens.get_token(channel, uid, force).await {
                Ok(token) => return Ok(token),
                Err(e) => {
                    tracing::warn!(
                        "Token fetch attempt {}/{} failed: {}",
                        attempt,
                        TOKEN_FETCH_ATTEMPTS,
                        e
                    );
                    last_err = Some(e);
                    if attempt < TOKEN_FETCH_ATTEMPTS {
                        tokio::time::sleep(backoff).await;
                        backoff *= 3;
                    }
                }
            }
        }

        Err(last_err.expect("at least one attempt"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{Token, TokenFetcher, TokenRequest};
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Transport that records calls and detects overlapping joins
    #[derive(Default)]
    struct MockTransport {
        calls: Mutex<Vec<String>>,
        joins_in_flight: AtomicUsize,
        max_join_overlap: AtomicUsize,
        join_delay_ms: u64,
        fail_join: AtomicBool,
        fail_renew: AtomicBool,
    }

    impl MockTransport {
        fn with_join_delay(ms: u64) -> Self {
            Self {
                join_delay_ms: ms,
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait::async_trait]
    impl AudioTransport for MockTransport {
        async fn join(&self, channel: &str, uid: u32, _token: &str) -> Result<(), TransportError> {
            let in_flight = self.joins_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_join_overlap.fetch_max(in_flight, Ordering::SeqCst);

            if self.join_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.join_delay_ms)).await;
            }

            self.joins_in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_join.load(Ordering::SeqCst) {
                self.record(format!("join-failed {}", channel));
                return Err(TransportError::NetworkInterrupted);
            }
            self.record(format!("join {} {}", channel, uid));
            Ok(())
        }

        async fn leave(&self) -> Result<(), TransportError> {
            self.record("leave".to_string());
            Ok(())
        }

        async fn set_transmit(&self, enabled: bool) -> Result<(), TransportError> {
            self.record(format!("transmit {}", enabled));
            Ok(())
        }

        async fn renew_token(&self, _token: &str) -> Result<(), TransportError> {
            if self.fail_renew.load(Ordering::SeqCst) {
                self.record("renew-failed".to_string());
                return Err(TransportError::TokenExpired);
            }
            self.record("renew".to_string());
            Ok(())
        }
    }

    struct StaticFetcher {
        fetches: AtomicUsize,
    }

    impl StaticFetcher {
        fn new() -> Self {
            Self {
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl TokenFetcher for StaticFetcher {
        async fn fetch(&self, request: &TokenRequest) -> Result<Token, TokenFetchError> {
            let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Token {
                channel: request.channel.clone(),
                uid: request.uid,
                value: format!("tok-{}", n),
                expires_at: Utc::now() + chrono::Duration::hours(1),
            })
        }
    }

    fn spawn_with(
        transport: Arc<MockTransport>,
    ) -> (SessionHandle, watch::Receiver<SessionSnapshot>, tokio::task::JoinHandle<()>) {
        let tokens = Arc::new(TokenProvider::new(
            Arc::new(StaticFetcher::new()),
            "default".to_string(),
            60,
        ));
        spawn(transport, tokens)
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_transitions_to_connected() {
        let transport = Arc::new(MockTransport::default());
        let (handle, state_rx, task) = spawn_with(Arc::clone(&transport));

        handle.join("ops-east", 2_000_417).await.unwrap();
        let snapshot = state_rx.borrow().clone();
        assert_eq!(snapshot.state, SessionState::Connected);
        assert_eq!(snapshot.channel.as_deref(), Some("ops-east"));
        assert_eq!(snapshot.local_uid, Some(2_000_417));

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_join_is_idempotent() {
        let transport = Arc::new(MockTransport::default());
        let (handle, _state_rx, task) = spawn_with(Arc::clone(&transport));

        handle.join("ops-east", 1).await.unwrap();
        handle.join("ops-east", 1).await.unwrap();
        handle.join("ops-east", 1).await.unwrap();

        let joins = transport
            .calls()
            .iter()
            .filter(|c| c.starts_with("join"))
            .count();
        assert_eq!(joins, 1);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_joins_never_overlap() {
        let transport = Arc::new(MockTransport::with_join_delay(100));
        let (handle, _state_rx, task) = spawn_with(Arc::clone(&transport));

        let a = handle.join("ops-east", 1);
        let b = handle.join("ops-west", 1);
        let (ra, rb) = tokio::join!(a, b);
        ra.unwrap();
        rb.unwrap();

        // The busy guard serialized them: no transport join overlapped
        assert_eq!(transport.max_join_overlap.load(Ordering::SeqCst), 1);
        // Second desired state applied after the first settled
        let calls = transport.calls();
        assert!(calls.contains(&"join ops-east 1".to_string()));
        assert!(calls.contains(&"join ops-west 1".to_string()));

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_transmit_lifecycle() {
        let transport = Arc::new(MockTransport::default());
        let (handle, state_rx, task) = spawn_with(Arc::clone(&transport));

        // Not joined yet: a signal, not an error
        assert_eq!(
            handle.start_transmit().await.unwrap(),
            TransmitOutcome::NotConnected
        );

        handle.join("ops-east", 1).await.unwrap();
        assert_eq!(handle.start_transmit().await.unwrap(), TransmitOutcome::Started);
        assert_eq!(state_rx.borrow().state, SessionState::Transmitting);

        // Transmitting returns to Connected, never straight to Disconnected
        assert_eq!(handle.stop_transmit().await.unwrap(), TransmitOutcome::Stopped);
        assert_eq!(state_rx.borrow().state, SessionState::Connected);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_failure_surfaces_error_state() {
        let transport = Arc::new(MockTransport::default());
        transport.fail_join.store(true, Ordering::SeqCst);
        let (handle, state_rx, task) = spawn_with(Arc::clone(&transport));

        assert!(handle.join("ops-east", 1).await.is_err());
        let snapshot = state_rx.borrow().clone();
        assert_eq!(snapshot.state, SessionState::Error);
        assert!(snapshot.last_error.is_some());

        // Explicit recovery: leave exits Error
        handle.leave().await.unwrap();
        assert_eq!(state_rx.borrow().state, SessionState::Disconnected);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_renewal_in_place() {
        let transport = Arc::new(MockTransport::default());
        let (handle, state_rx, task) = spawn_with(Arc::clone(&transport));

        handle.join("ops-east", 1).await.unwrap();
        handle
            .transport_event(crate::transport::TransportEvent::TokenWillExpire)
            .await
            .unwrap();
        // Drain the queue so the refresh has been processed
        handle.stop_transmit().await.unwrap();

        assert!(transport.calls().contains(&"renew".to_string()));
        assert_eq!(state_rx.borrow().state, SessionState::Connected);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_renewal_rejoins_once() {
        let transport = Arc::new(MockTransport::default());
        transport.fail_renew.store(true, Ordering::SeqCst);
        let (handle, state_rx, task) = spawn_with(Arc::clone(&transport));

        handle.join("ops-east", 1).await.unwrap();
        handle
            .transport_event(crate::transport::TransportEvent::TokenWillExpire)
            .await
            .unwrap();
        handle.stop_transmit().await.unwrap();

        let calls = transport.calls();
        let joins = calls.iter().filter(|c| c.starts_with("join ")).count();
        assert_eq!(joins, 2, "exactly one rejoin after the initial join: {:?}", calls);
        assert!(calls.contains(&"leave".to_string()));
        assert_eq!(state_rx.borrow().state, SessionState::Connected);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_renewal_and_rejoin_surfaces_error() {
        let transport = Arc::new(MockTransport::default());
        transport.fail_renew.store(true, Ordering::SeqCst);
        let (handle, state_rx, task) = spawn_with(Arc::clone(&transport));

        handle.join("ops-east", 1).await.unwrap();

        // The rejoin after the failed renewal fails too
        transport.fail_join.store(true, Ordering::SeqCst);
        handle
            .transport_event(crate::transport::TransportEvent::TokenWillExpire)
            .await
            .unwrap();
        handle.stop_transmit().await.unwrap();

        let calls = transport.calls();
        let rejoin_attempts = calls.iter().filter(|c| c.starts_with("join-failed")).count();
        assert_eq!(rejoin_attempts, 1, "exactly one rejoin attempt: {:?}", calls);
        assert!(calls.contains(&"leave".to_string()));

        // No silent retry loop: the failure surfaces as Error
        let snapshot = state_rx.borrow().clone();
        assert_eq!(snapshot.state, SessionState::Error);
        assert!(snapshot.last_error.is_some());

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_lost_surfaces_error() {
        let transport = Arc::new(MockTransport::default());
        let (handle, state_rx, task) = spawn_with(Arc::clone(&transport));

        handle.join("ops-east", 1).await.unwrap();
        handle
            .transport_event(crate::transport::TransportEvent::ConnectionLost(
                TransportError::NetworkInterrupted,
            ))
            .await
            .unwrap();
        handle.stop_transmit().await.unwrap();

        assert_eq!(state_rx.borrow().state, SessionState::Error);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_leaves_joined_channel() {
        let transport = Arc::new(MockTransport::default());
        let (handle, state_rx, task) = spawn_with(Arc::clone(&transport));

        handle.join("ops-east", 1).await.unwrap();
        handle.shutdown().await.unwrap();
        task.await.unwrap();

        assert!(transport.calls().contains(&"leave".to_string()));
        assert_eq!(state_rx.borrow().state, SessionState::Disconnected);
    }
}
