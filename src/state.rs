//! State machine types for the voxlink session
//!
//! Defines the states for the push-to-talk session lifecycle:
//! Disconnected → Connecting → Connected ⇄ Transmitting → Disconnected
//!
//! Transmitting is only reachable from Connected and always steps back to
//! Connected, never directly to Disconnected.

use std::time::Instant;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No channel joined
    Disconnected,
    /// Token fetched, transport join in flight
    Connecting,
    /// Channel joined, not transmitting
    Connected,
    /// Channel joined, audio flowing
    Transmitting,
    /// Unrecoverable transport failure; explicit retry/leave required
    Error,
}

impl SessionState {
    /// Short lowercase name, written to the state file for external consumers
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Transmitting => "transmitting",
            SessionState::Error => "error",
        }
    }

    /// Check if a channel is joined (transmitting or not)
    pub fn is_joined(&self) -> bool {
        matches!(self, SessionState::Connected | SessionState::Transmitting)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human-readable record of the last session failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    /// What failed, engine error code or description
    pub message: String,
}

/// The one transport session owned by the session actor
///
/// Exactly one instance exists per process; all mutation goes through the
/// session actor.
#[derive(Debug)]
pub struct Session {
    /// Channel currently targeted (None while fully disconnected)
    pub channel: Option<String>,
    /// Local transport UID (None until the first join)
    pub local_uid: Option<u32>,
    /// Current lifecycle state
    pub state: SessionState,
    /// When the transport join succeeded
    pub connected_at: Option<Instant>,
    /// Last failure, kept across the Error state for observers
    pub last_error: Option<ErrorInfo>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            channel: None,
            local_uid: None,
            state: SessionState::Disconnected,
            connected_at: None,
            last_error: None,
        }
    }

    /// Duration since the transport join succeeded, if connected
    pub fn connected_duration(&self) -> Option<std::time::Duration> {
        self.connected_at.map(|t| t.elapsed())
    }

    /// Observable snapshot published on the state watch channel
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            channel: self.channel.clone(),
            local_uid: self.local_uid,
            last_error: self.last_error.as_ref().map(|e| e.message.clone()),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable view of the session, published via `tokio::sync::watch`
///
/// This is the observable state stream consumed by the host UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub channel: Option<String>,
    pub local_uid: Option<u32>,
    pub last_error: Option<String>,
}

impl SessionSnapshot {
    pub fn disconnected() -> Self {
        Self {
            state: SessionState::Disconnected,
            channel: None,
            local_uid: None,
            last_error: None,
        }
    }
}

impl std::fmt::Display for SessionSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.channel, self.local_uid) {
            (Some(channel), Some(uid)) => {
                write!(f, "{} (channel {:?}, uid {})", self.state, channel, uid)
            }
            _ => write!(f, "{}", self.state),
        }
    }
}
