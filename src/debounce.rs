//! Connect/disconnect debouncing
//!
//! Converts the canonical press/release stream into connect/disconnect
//! decisions with hysteresis. Opening a channel is expensive (token fetch,
//! transport join), so release does not tear the channel down immediately:
//! transmission stops at once, and a disconnect is scheduled `D` later. A
//! new press inside that window cancels the teardown and reuses the live
//! channel. Rapid tapping therefore costs one connect, not one per tap.
//!
//! The debouncer is a single-threaded actor: press/release arrive as
//! messages, and the pending deadline is actor-local state manipulated
//! between `select!` polls, so cancel-then-reschedule is atomic with respect
//! to concurrent callers and a disconnect can never fire after a
//! just-processed press.
//!
//! The wake hold lives here too: taken with the connect intent, dropped only
//! when a disconnect is actually issued, never while a reuse-driven
//! reconnect is still possible.
//!
//! The actor also watches the observable session state: when the session
//! surfaces Error underneath a held channel (engine failure), the drop-out
//! is routed through the same disconnect path, so the wake hold and the
//! connected belief reset and the next press opens a fresh connection.

use crate::session::SessionHandle;
use crate::state::{SessionSnapshot, SessionState};
use crate::wake::WakeHold;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

/// Debounce instrumentation, alive for the whole process
///
/// Counters reset only on an explicit instrumentation reset.
#[derive(Debug, Default)]
struct DebounceWindow {
    pending_disconnect_at: Option<Instant>,
    connect_count: u64,
    disconnect_count: u64,
}

/// Instrumentation snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceStats {
    pub connect_count: u64,
    pub disconnect_count: u64,
    pub pending_disconnect: bool,
}

/// Commands accepted by the debouncer actor
#[derive(Debug)]
pub enum DebounceCommand {
    /// Canonical press from the arbiter
    Press,
    /// Canonical release from the arbiter
    Release,
    /// Immediate teardown regardless of timer state (shutdown, session lost)
    ForceDisconnect { reply: Option<oneshot::Sender<()>> },
    /// Instrumentation snapshot
    Stats { reply: oneshot::Sender<DebounceStats> },
    /// Explicit instrumentation reset
    ResetCounters,
}

/// Cloneable handle to the debouncer actor
#[derive(Clone)]
pub struct DebouncerHandle {
    tx: mpsc::Sender<DebounceCommand>,
}

impl DebouncerHandle {
    pub async fn press(&self) {
        let _ = self.tx.send(DebounceCommand::Press).await;
    }

    pub async fn release(&self) {
        let _ = self.tx.send(DebounceCommand::Release).await;
    }

    /// Tear down immediately and wait until the disconnect is issued
    pub async fn force_disconnect(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(DebounceCommand::ForceDisconnect {
                reply: Some(reply_tx),
            })
            .await
            .is_ok()
        {
            let _ = reply_rx.await;
        }
    }

    pub async fn stats(&self) -> Option<DebounceStats> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(DebounceCommand::Stats { reply: reply_tx })
            .await
            .ok()?;
        reply_rx.await.ok()
    }

    pub async fn reset_counters(&self) {
        let _ = self.tx.send(DebounceCommand::ResetCounters).await;
    }
}

/// Spawn the debouncer actor
///
/// Connect/disconnect intents target the given channel and uid on the
/// session handle; `delay` is the teardown hysteresis `D`. `state_rx` is
/// the session's observable state stream, watched for drop-outs.
pub fn spawn(
    session: SessionHandle,
    channel: String,
    uid: u32,
    delay: Duration,
    wake: Arc<dyn WakeHold>,
    state_rx: watch::Receiver<SessionSnapshot>,
) -> (DebouncerHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(64);

    let actor = DebounceActor {
        session,
        channel,
        uid,
        delay,
        wake,
        connected: false,
        window: DebounceWindow::default(),
        rx,
        state_rx,
    };

    let task = tokio::spawn(actor.run());
    (DebouncerHandle { tx }, task)
}

struct DebounceActor {
    session: SessionHandle,
    channel: String,
    uid: u32,
    delay: Duration,
    wake: Arc<dyn WakeHold>,
    /// Whether this actor believes it holds the channel open
    connected: bool,
    window: DebounceWindow,
    rx: mpsc::Receiver<DebounceCommand>,
    state_rx: watch::Receiver<SessionSnapshot>,
}

impl DebounceActor {
    async fn run(mut self) {
        tracing::debug!("Debouncer running (D = {:?})", self.delay);

        loop {
            let deadline = self.window.pending_disconnect_at;
            tokio::select! {
                cmd = self.rx.recv() => {
                    match cmd {
                        Some(DebounceCommand::Press) => self.on_press().await,
                        Some(DebounceCommand::Release) => self.on_release().await,
                        Some(DebounceCommand::ForceDisconnect { reply }) => {
                            self.force_disconnect().await;
                            if let Some(reply) = reply {
                                let _ = reply.send(());
                            }
                        }
                        Some(DebounceCommand::Stats { reply }) => {
                            let _ = reply.send(DebounceStats {
                                connect_count: self.window.connect_count,
                                disconnect_count: self.window.disconnect_count,
                                pending_disconnect: self.window.pending_disconnect_at.is_some(),
                            });
                        }
                        Some(DebounceCommand::ResetCounters) => {
                            self.window.connect_count = 0;
                            self.window.disconnect_count = 0;
                        }
                        None => break,
                    }
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                        if deadline.is_some() => {
                    self.on_deadline().await;
                }
                Ok(()) = self.state_rx.changed() => {
                    let state = self.state_rx.borrow_and_update().state;
                    self.on_session_state(state).await;
                }
            }
        }

        tracing::debug!("Debouncer stopped");
    }

    async fn on_press(&mut self) {
        // Cancel any pending teardown before anything else
        if self.window.pending_disconnect_at.take().is_some() {
            tracing::debug!("Press inside debounce window, reusing channel");
        }

        if !self.connected {
            self.wake.acquire();
            self.connected = true;
            self.window.connect_count += 1;
            tracing::info!(
                "Connect intent: channel {:?} (connect #{})",
                self.channel,
                self.window.connect_count
            );
            let _ = self.session.connect(&self.channel, self.uid).await;
        }

        let _ = self.session.transmit(true).await;
    }

    async fn on_release(&mut self) {
        // Stop transmission immediately, independent of teardown
        let _ = self.session.transmit(false).await;

        if self.connected {
            let deadline = Instant::now() + self.delay;
            self.window.pending_disconnect_at = Some(deadline);
            tracing::debug!("Disconnect scheduled in {:?}", self.delay);
        }
    }

    async fn on_deadline(&mut self) {
        self.window.pending_disconnect_at = None;
        if self.connected {
            self.disconnect().await;
        }
    }

    async fn force_disconnect(&mut self) {
        self.window.pending_disconnect_at = None;
        if self.connected {
            self.disconnect().await;
        } else {
            // Hold may still be up if the session dropped out underneath us
            self.wake.release();
        }
    }

    /// The session dropped out underneath a held channel (engine failure).
    /// Route it through the normal disconnect path: the leave clears the
    /// Error state, the hold is released, and the next press reconnects.
    async fn on_session_state(&mut self, state: SessionState) {
        if self.connected && state == SessionState::Error {
            tracing::warn!(
                "Session dropped out of channel {:?}, resetting channel hold",
                self.channel
            );
            self.window.pending_disconnect_at = None;
            self.disconnect().await;
        }
    }

    async fn disconnect(&mut self) {
        self.connected = false;
        self.window.disconnect_count += 1;
        tracing::info!(
            "Disconnect intent: channel {:?} (disconnect #{})",
            self.channel,
            self.window.disconnect_count
        );
        let _ = self.session.disconnect().await;
        // No pending deadline remains at this point, safe to drop the hold
        self.wake.release();
    }
}
