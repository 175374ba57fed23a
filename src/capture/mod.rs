//! Key capture module
//!
//! The host OS may deliver the same physical key action through more than
//! one capture path at once: a kernel-level key intercept, an
//! accessibility-style external trigger, and a virtual media-route button.
//! Each path is a pluggable capture source feeding raw down/up reports into
//! the arbiter, which collapses overlapping reports into one canonical
//! press/release stream.
//!
//! On Linux the hardware and media-route paths use evdev and require the
//! user to be in the 'input' group. The accessibility path is driven
//! externally via SIGUSR1/SIGUSR2 (`voxlink key press/release`).

pub mod arbiter;
#[cfg(target_os = "linux")]
pub mod evdev_listener;
pub mod health;

use crate::config::KeysConfig;
use crate::error::CaptureError;
use tokio::sync::mpsc;

/// Which capture path reported a key action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Kernel-level key intercept (evdev)
    Hardware,
    /// External/accessibility trigger (signals, compositor keybindings)
    Accessibility,
    /// Virtual media-route button (headset key)
    MediaRoute,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SourceKind::Hardware => "hardware",
            SourceKind::Accessibility => "accessibility",
            SourceKind::MediaRoute => "media-route",
        };
        f.write_str(name)
    }
}

/// Raw key action as reported by a single capture source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Down,
    Up,
}

/// One raw report from one capture source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEvent {
    /// Logical control this report is for (the daemon registers "ptt")
    pub control: String,
    pub source: SourceKind,
    pub action: KeyAction,
}

/// Canonical events emitted by the arbiter after deduplication
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyEvent {
    /// The control went from no active sources to at least one
    Pressed { control: String },
    /// The control's last active source released
    Released { control: String },
}

/// Trait for capture source implementations
#[async_trait::async_trait]
pub trait CaptureListener: Send + Sync {
    /// Start reporting raw key actions on the given channel
    async fn start(&mut self, tx: mpsc::Sender<SourceEvent>) -> Result<(), CaptureError>;

    /// Stop listening and clean up
    async fn stop(&mut self) -> Result<(), CaptureError>;
}

/// Create the built-in capture listeners for this platform
///
/// On Linux: an evdev listener for the hardware key, plus a second evdev
/// listener for the media-route key when one is configured.
#[cfg(target_os = "linux")]
pub fn create_listeners(
    config: &KeysConfig,
    control: &str,
) -> Result<Vec<Box<dyn CaptureListener>>, CaptureError> {
    let mut listeners: Vec<Box<dyn CaptureListener>> = Vec::new();

    listeners.push(Box::new(evdev_listener::EvdevListener::new(
        &config.key,
        &config.modifiers,
        SourceKind::Hardware,
        control,
    )?));

    if let Some(ref media_key) = config.media_key {
        listeners.push(Box::new(evdev_listener::EvdevListener::new(
            media_key,
            &[],
            SourceKind::MediaRoute,
            control,
        )?));
    }

    Ok(listeners)
}

/// Create the built-in capture listeners for this platform
///
/// Non-Linux builds have no built-in capture paths; drive the daemon with
/// `voxlink key press/release` instead.
#[cfg(not(target_os = "linux"))]
pub fn create_listeners(
    _config: &KeysConfig,
    _control: &str,
) -> Result<Vec<Box<dyn CaptureListener>>, CaptureError> {
    Ok(Vec::new())
}
