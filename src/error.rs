//! Error types for voxlink
//!
//! Uses thiserror for ergonomic error definitions with clear messages
//! that guide users toward fixing common issues.

use thiserror::Error;

/// Top-level error type for the voxlink application
#[derive(Error, Debug)]
pub enum VoxlinkError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Token fetch error: {0}")]
    Token(#[from] TokenFetchError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Signal error: {0}")]
    Signal(#[from] SignalError),

    #[error("Settings store error: {0}")]
    Store(#[from] StoreError),

    #[error("Session actor is gone")]
    SessionGone,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to key capture
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Cannot open input device '{0}'. Is the user in the 'input' group?\n  Run: sudo usermod -aG input $USER\n  Then log out and back in.")]
    DeviceAccess(String),

    #[error("Unknown key name: '{0}'. Use evtest to find valid key names.")]
    UnknownKey(String),

    #[error("No keyboard device found in /dev/input/")]
    NoKeyboard,

    #[error("Key capture is disabled at the OS level. Re-grant input access to restore the push-to-talk key.")]
    Unavailable,

    #[error("evdev error: {0}")]
    Evdev(String),
}

/// Errors reported by the external audio transport engine
///
/// All variants map to engine error codes. Token expiry and network
/// interruption are recoverable; the session actor attempts at most one
/// automatic rejoin before surfacing the Error state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport token expired")]
    TokenExpired,

    #[error("invalid channel name: '{0}'")]
    InvalidChannel(String),

    #[error("network interrupted")]
    NetworkInterrupted,

    #[error("transport engine not ready")]
    NotReady,

    #[error("transport engine error: {0}")]
    Engine(String),
}

/// Errors from the token endpoint (always recoverable, retried with backoff)
#[derive(Error, Debug, Clone)]
pub enum TokenFetchError {
    #[error("token endpoint unreachable: {0}")]
    Network(String),

    #[error("token endpoint rejected request: {0}")]
    Auth(String),

    #[error("token endpoint returned malformed response: {0}")]
    InvalidResponse(String),
}

/// Errors from the identity mapping store
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("no persisted identity mapping exists")]
    NotFound,

    #[error("identity store error: {0}")]
    Store(#[from] StoreError),

    #[error("UID band for scheme '{0}' is exhausted")]
    BandExhausted(String),
}

/// Signal validation failures
///
/// These never propagate past the SignalingReceiver; malformed and
/// self-originated messages are logged and dropped.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SignalError {
    #[error("signal message missing required field '{0}'")]
    MissingField(String),

    #[error("unknown signal type: '{0}'")]
    UnknownType(String),

    #[error("signal sender UID is not a valid integer: '{0}'")]
    BadUid(String),

    #[error("signal payload is not a JSON object")]
    NotAnObject,
}

/// Errors from the persisted key-value settings store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to read settings: {0}")]
    Read(String),

    #[error("failed to write settings: {0}")]
    Write(String),

    #[error("settings file is corrupt: {0}")]
    Corrupt(String),
}

/// Result type alias using VoxlinkError
pub type Result<T> = std::result::Result<T, VoxlinkError>;

#[cfg(target_os = "linux")]
impl From<evdev::Error> for CaptureError {
    fn from(e: evdev::Error) -> Self {
        CaptureError::Evdev(e.to_string())
    }
}
