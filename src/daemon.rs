//! Daemon module - main event loop orchestration
//!
//! Wires the capture paths, arbiter, debouncer, signaling receiver, and
//! session actor together and owns the process-level concerns: PID file,
//! state file, POSIX signal handling, graceful shutdown.

use crate::capture::health::{AlwaysEnabledProbe, CaptureHealthMonitor, CaptureProbe};
use crate::capture::{self, CaptureListener, KeyAction, KeyEvent, SourceEvent, SourceKind};
use crate::config::Config;
use crate::debounce;
use crate::error::{CaptureError, Result, VoxlinkError};
use crate::identity::{IdentityMapper, IdentityScheme};
use crate::session;
use crate::signaling::SignalingReceiver;
use crate::store::TomlStore;
use crate::token::{HttpTokenFetcher, TokenProvider};
use crate::transport::NullTransport;
use crate::wake::NoopWakeHold;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, oneshot};

/// Logical control the built-in capture paths report on
const PTT_CONTROL: &str = "ptt";

/// Buffer for raw source reports and canonical key events
const CAPTURE_BUFFER: usize = 64;

/// Write state to file for external integrations (e.g., Waybar)
fn write_state_file(path: &PathBuf, state: &str) {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::warn!("Failed to create state file directory: {}", e);
            return;
        }
    }

    if let Err(e) = std::fs::write(path, state) {
        tracing::warn!("Failed to write state file: {}", e);
    } else {
        tracing::trace!("State file updated: {}", state);
    }
}

/// Remove state file on shutdown
fn cleanup_state_file(path: &PathBuf) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!("Failed to remove state file: {}", e);
        }
    }
}

/// Write PID file for external control via signals
fn write_pid_file() -> Option<PathBuf> {
    let pid_path = Config::runtime_dir().join("pid");

    // Ensure parent directory exists
    if let Some(parent) = pid_path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::warn!("Failed to create PID file directory: {}", e);
            return None;
        }
    }

    let pid = std::process::id();
    if let Err(e) = std::fs::write(&pid_path, pid.to_string()) {
        tracing::warn!("Failed to write PID file: {}", e);
        return None;
    }

    tracing::debug!("PID file written: {:?} (pid={})", pid_path, pid);
    Some(pid_path)
}

/// Remove PID file on shutdown
fn cleanup_pid_file(path: &PathBuf) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!("Failed to remove PID file: {}", e);
        }
    }
}

/// Main daemon that orchestrates all components
pub struct Daemon {
    config: Config,
    state_file_path: Option<PathBuf>,
    pid_file_path: Option<PathBuf>,
    // Optional external push-message feed (wired in by the embedder)
    signal_rx: Option<mpsc::Receiver<serde_json::Value>>,
}

impl Daemon {
    /// Create a new daemon with the given configuration
    pub fn new(config: Config) -> Self {
        let state_file_path = config.resolve_state_file();

        Self {
            config,
            state_file_path,
            pid_file_path: None,
            signal_rx: None,
        }
    }

    /// Attach a push-message source feeding raw signaling payloads
    pub fn with_signal_source(mut self, rx: mpsc::Receiver<serde_json::Value>) -> Self {
        self.signal_rx = Some(rx);
        self
    }

    /// Update the state file if configured
    fn update_state(&self, state_name: &str) {
        if let Some(ref path) = self.state_file_path {
            write_state_file(path, state_name);
        }
    }

    /// Run the daemon main loop
    pub async fn run(&mut self) -> Result<()> {
        tracing::info!("Starting voxlink daemon");

        // Write PID file for external control via signals
        self.pid_file_path = write_pid_file();

        // Set up signal handlers for external control
        let mut sigusr1 = signal(SignalKind::user_defined1())
            .map_err(|e| VoxlinkError::Config(format!("Failed to set up SIGUSR1 handler: {}", e)))?;
        let mut sigusr2 = signal(SignalKind::user_defined2())
            .map_err(|e| VoxlinkError::Config(format!("Failed to set up SIGUSR2 handler: {}", e)))?;
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| VoxlinkError::Config(format!("Failed to set up SIGTERM handler: {}", e)))?;

        // Ensure required directories exist
        Config::ensure_directories()?;

        // Local identity: map the app user id to a stable numeric UID
        let scheme = IdentityScheme::parse(&self.config.identity.scheme).ok_or_else(|| {
            VoxlinkError::Config(format!(
                "Unknown identity scheme: '{}'",
                self.config.identity.scheme
            ))
        })?;
        let store = Arc::new(TomlStore::open(Config::settings_path())?);
        let identity = Arc::new(IdentityMapper::new(store));
        let local_uid = identity.get_or_create_uid(scheme, &self.config.identity.app_user_id)?;
        tracing::info!(
            "Local identity: {} '{}' -> uid {}",
            scheme,
            self.config.identity.app_user_id,
            local_uid
        );

        // Token provider over the HTTP endpoint
        let fetcher = Arc::new(HttpTokenFetcher::new(self.config.token.endpoint.clone()));
        let tokens = Arc::new(TokenProvider::new(
            fetcher,
            self.config.token.tenant.clone(),
            self.config.token.refresh_margin_secs,
        ));

        // Session actor over the audio transport
        let transport = Arc::new(NullTransport);
        let (session, mut state_rx, session_task) = session::spawn(transport, tokens);

        // Debouncer in front of the session
        let channel = self.config.channel.name.clone();
        let delay = Duration::from_millis(self.config.debounce.disconnect_delay_ms);
        tracing::info!(
            "Channel: {:?}, teardown delay: {:?}",
            channel,
            delay
        );
        let (debouncer, debounce_task) = debounce::spawn(
            session.clone(),
            channel,
            local_uid,
            delay,
            Arc::new(NoopWakeHold),
            state_rx.clone(),
        );

        // Signaling receiver for remote push messages
        let signaling = SignalingReceiver::new(
            Arc::clone(&identity),
            scheme,
            self.config.identity.app_user_id.clone(),
        );

        // Capture paths feed the arbiter; the arbiter feeds the loop
        let (source_tx, source_rx) = mpsc::channel::<SourceEvent>(CAPTURE_BUFFER);
        let (events_tx, mut events_rx) = mpsc::channel::<KeyEvent>(CAPTURE_BUFFER);
        let arbiter_task = tokio::spawn(capture::arbiter::run_arbiter(source_rx, events_tx));

        let mut listeners: Vec<Box<dyn CaptureListener>> = if self.config.keys.enabled {
            tracing::info!("Push-to-talk key: {}", self.config.keys.key);
            capture::create_listeners(&self.config.keys, PTT_CONTROL)?
        } else {
            tracing::info!(
                "Built-in key capture disabled, use 'voxlink key press/release' or compositor keybindings"
            );
            Vec::new()
        };
        for listener in &mut listeners {
            listener.start(source_tx.clone()).await?;
        }

        // Capture health monitor
        #[cfg(target_os = "linux")]
        let probe: Box<dyn CaptureProbe> = if self.config.keys.enabled {
            Box::new(crate::capture::health::EvdevProbe::new(&self.config.keys.key))
        } else {
            Box::new(AlwaysEnabledProbe)
        };
        #[cfg(not(target_os = "linux"))]
        let probe: Box<dyn CaptureProbe> = Box::new(AlwaysEnabledProbe);

        let (monitor, mut health_rx) = CaptureHealthMonitor::new(probe, &self.config.health);
        let (health_stop_tx, health_stop_rx) = oneshot::channel();
        let health_task = tokio::spawn(monitor.run(health_stop_rx));

        // Log state file if configured
        if let Some(ref path) = self.state_file_path {
            tracing::info!("State file: {:?}", path);
        }

        // Write initial state
        self.update_state(state_rx.borrow().state.as_str());

        // Moved out of self so the select arm can borrow it independently
        let mut signal_rx = self.signal_rx.take();

        // Main event loop
        loop {
            tokio::select! {
                // Canonical press/release events from the arbiter
                Some(event) = events_rx.recv() => {
                    match event {
                        KeyEvent::Pressed { control } => {
                            tracing::debug!("Key pressed ({})", control);
                            debouncer.press().await;
                        }
                        KeyEvent::Released { control } => {
                            tracing::debug!("Key released ({})", control);
                            debouncer.release().await;
                        }
                    }
                }

                // Remote signaling payloads (only if a source is attached)
                Some(payload) = async {
                    match &mut signal_rx {
                        Some(rx) => rx.recv().await,
                        None => std::future::pending().await,
                    }
                } => {
                    if let Some(cmd) = signaling.handle_payload(&payload) {
                        tracing::info!(
                            "Auto-join {:?} requested by uid {} ({})",
                            cmd.channel,
                            cmd.sender_uid,
                            cmd.reason
                        );
                        if let Err(e) = session
                            .auto_join(&cmd.channel, local_uid, cmd.sender_uid, &cmd.reason, cmd.emergency)
                            .await
                        {
                            tracing::error!("Auto-join failed: {}", e);
                        }
                    }
                }

                // Handle SIGUSR1 - external key press (compositor keybindings)
                _ = sigusr1.recv() => {
                    tracing::debug!("Received SIGUSR1 (key press)");
                    let _ = source_tx.send(SourceEvent {
                        control: PTT_CONTROL.to_string(),
                        source: SourceKind::Accessibility,
                        action: KeyAction::Down,
                    }).await;
                }

                // Handle SIGUSR2 - external key release
                _ = sigusr2.recv() => {
                    tracing::debug!("Received SIGUSR2 (key release)");
                    let _ = source_tx.send(SourceEvent {
                        control: PTT_CONTROL.to_string(),
                        source: SourceKind::Accessibility,
                        action: KeyAction::Up,
                    }).await;
                }

                // Session state transitions drive the state file
                Ok(()) = state_rx.changed() => {
                    let snapshot = state_rx.borrow_and_update().clone();
                    tracing::debug!("Session state: {}", snapshot);
                    self.update_state(snapshot.state.as_str());
                }

                // Capture path health transitions
                Ok(()) = health_rx.changed() => {
                    let health = health_rx.borrow_and_update().clone();
                    if health.remediation_required {
                        tracing::warn!(
                            "{} Until then, 'voxlink key press/release' still drives the daemon.",
                            CaptureError::Unavailable
                        );
                    } else if health.enabled {
                        tracing::info!("Key capture is available again");
                    }
                }

                // Handle graceful shutdown (SIGINT from Ctrl+C)
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Received SIGINT, shutting down...");
                    break;
                }

                // Handle graceful shutdown (SIGTERM from systemctl stop)
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, shutting down...");
                    break;
                }
            }
        }

        // Cleanup: stop capture first so no new presses arrive
        for listener in &mut listeners {
            listener.stop().await?;
        }
        drop(source_tx);
        let _ = arbiter_task.await;

        let _ = health_stop_tx.send(());
        let _ = health_task.await;

        // Tear the session down without waiting out the debounce window
        debouncer.force_disconnect().await;
        session.shutdown().await?;
        drop(debouncer);
        let _ = debounce_task.await;
        let _ = session_task.await;

        // Remove state file on shutdown
        if let Some(ref path) = self.state_file_path {
            cleanup_state_file(path);
        }

        // Remove PID file on shutdown
        if let Some(ref path) = self.pid_file_path {
            cleanup_pid_file(path);
        }

        tracing::info!("Daemon stopped");

        Ok(())
    }
}
