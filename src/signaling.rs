//! Remote signaling
//!
//! Push messages coordinate session actions across devices: session
//! start/stop notices, auto-join and invite requests, emergency calls.
//! Payloads are validated per type, self-originated echoes are rejected
//! (the push fan-out includes the sender's own device), and surviving
//! messages are translated into session commands. Validation failures are
//! logged and dropped here; they never reach the state machine.
//!
//! Signaling bypasses the debouncer on purpose: a push message is a
//! discrete remote command, not a noisy physical signal.

use crate::error::SignalError;
use crate::identity::{IdentityMapper, IdentityScheme};
use serde_json::Value;
use std::sync::Arc;

/// A validated signaling message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalMessage {
    /// Another device started a session (informational)
    SessionStart { channel: String, sender_uid: u32 },
    /// Another device stopped a session (informational)
    SessionStop { channel: String, sender_uid: u32 },
    /// Remote request to join a channel
    AutoJoin {
        channel: String,
        sender_uid: u32,
        reason: String,
    },
    /// Personal invitation to a channel
    Invite {
        channel: String,
        inviter_uid: u32,
        inviter_name: String,
    },
    /// Emergency call; always attempted immediately, exempt from any
    /// rate limiting applied to ordinary auto-joins
    Emergency {
        channel: String,
        sender_uid: u32,
        emergency_type: String,
    },
}

impl SignalMessage {
    /// UID of the device that originated this message
    pub fn sender_uid(&self) -> u32 {
        match self {
            SignalMessage::SessionStart { sender_uid, .. }
            | SignalMessage::SessionStop { sender_uid, .. }
            | SignalMessage::AutoJoin { sender_uid, .. }
            | SignalMessage::Emergency { sender_uid, .. } => *sender_uid,
            SignalMessage::Invite { inviter_uid, .. } => *inviter_uid,
        }
    }

    /// Parse and validate a raw push payload
    pub fn parse(payload: &Value) -> Result<Self, SignalError> {
        let obj = payload.as_object().ok_or(SignalError::NotAnObject)?;

        let msg_type = require_str(obj, "type")?;
        let channel = require_str(obj, "channel")?.to_string();

        match msg_type {
            "session_start" => Ok(SignalMessage::SessionStart {
                channel,
                sender_uid: require_uid(obj, "uid")?,
            }),
            "session_stop" => Ok(SignalMessage::SessionStop {
                channel,
                sender_uid: require_uid(obj, "uid")?,
            }),
            "auto_join" => Ok(SignalMessage::AutoJoin {
                channel,
                sender_uid: require_uid(obj, "uid")?,
                reason: require_str(obj, "reason")?.to_string(),
            }),
            "invite" => Ok(SignalMessage::Invite {
                channel,
                inviter_uid: require_uid(obj, "inviterUid")?,
                inviter_name: require_str(obj, "inviterName")?.to_string(),
            }),
            "emergency" => Ok(SignalMessage::Emergency {
                channel,
                sender_uid: require_uid(obj, "uid")?,
                emergency_type: require_str(obj, "emergencyType")?.to_string(),
            }),
            other => Err(SignalError::UnknownType(other.to_string())),
        }
    }
}

fn require_str<'a>(
    obj: &'a serde_json::Map<String, Value>,
    field: &str,
) -> Result<&'a str, SignalError> {
    obj.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| SignalError::MissingField(field.to_string()))
}

/// UIDs are string-encoded integers on the wire; bare numbers are accepted
/// too since some push transports coerce them.
fn require_uid(obj: &serde_json::Map<String, Value>, field: &str) -> Result<u32, SignalError> {
    let value = obj
        .get(field)
        .ok_or_else(|| SignalError::MissingField(field.to_string()))?;

    match value {
        Value::String(s) => s
            .parse::<u32>()
            .map_err(|_| SignalError::BadUid(s.clone())),
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| SignalError::BadUid(n.to_string())),
        other => Err(SignalError::BadUid(other.to_string())),
    }
}

/// Session command produced from a valid, non-self signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalCommand {
    pub channel: String,
    pub sender_uid: u32,
    pub reason: String,
    pub emergency: bool,
}

/// Validates push payloads and turns them into session commands
pub struct SignalingReceiver {
    identity: Arc<IdentityMapper>,
    scheme: IdentityScheme,
    app_user_id: String,
}

impl SignalingReceiver {
    pub fn new(identity: Arc<IdentityMapper>, scheme: IdentityScheme, app_user_id: String) -> Self {
        Self {
            identity,
            scheme,
            app_user_id,
        }
    }

    /// Validate a raw payload and translate it to a session command.
    ///
    /// Returns `None` for malformed payloads, self-echoes, and
    /// informational message types; none of these ever reach the session.
    pub fn handle_payload(&self, payload: &Value) -> Option<SignalCommand> {
        let message = match SignalMessage::parse(payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Dropping malformed signal: {}", e);
                return None;
            }
        };

        if self.is_self(&message) {
            tracing::debug!("Dropping self-originated signal (uid {})", message.sender_uid());
            return None;
        }

        match message {
            SignalMessage::SessionStart { channel, sender_uid } => {
                tracing::info!(
                    "Remote session started on {:?} by uid {}",
                    channel,
                    sender_uid
                );
                None
            }
            SignalMessage::SessionStop { channel, sender_uid } => {
                tracing::info!(
                    "Remote session stopped on {:?} by uid {}",
                    channel,
                    sender_uid
                );
                None
            }
            SignalMessage::AutoJoin {
                channel,
                sender_uid,
                reason,
            } => Some(SignalCommand {
                channel,
                sender_uid,
                reason,
                emergency: false,
            }),
            SignalMessage::Invite {
                channel,
                inviter_uid,
                inviter_name,
            } => Some(SignalCommand {
                channel,
                sender_uid: inviter_uid,
                reason: format!("invited by {}", inviter_name),
                emergency: false,
            }),
            SignalMessage::Emergency {
                channel,
                sender_uid,
                emergency_type,
            } => Some(SignalCommand {
                channel,
                sender_uid,
                reason: format!("emergency: {}", emergency_type),
                emergency: true,
            }),
        }
    }

    fn is_self(&self, message: &SignalMessage) -> bool {
        match self.identity.get_existing_uid(self.scheme, &self.app_user_id) {
            Ok(local_uid) => message.sender_uid() == local_uid,
            // No local mapping yet means nothing we sent could carry a UID
            Err(_) => false,
        }
    }
}
