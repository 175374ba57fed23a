//! evdev-based capture source
//!
//! Uses the Linux evdev interface to observe key state at the kernel level,
//! below the display server, so it works on every compositor. One instance
//! watches one target key and reports raw down/up for one capture path;
//! the daemon runs a second instance for the media-route key so the same
//! physical hold can arrive through both paths.
//!
//! The user must be in the 'input' group to access /dev/input/* devices.

use super::{KeyAction, SourceEvent, SourceKind};
use crate::error::CaptureError;
use evdev::{Device, InputEventKind, Key};
use std::collections::HashSet;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};

/// evdev-based capture listener for a single target key
pub struct EvdevListener {
    /// The key to listen for
    target_key: Key,
    /// Modifier keys that must be held
    modifier_keys: HashSet<Key>,
    /// Which capture path this listener reports as
    source: SourceKind,
    /// Logical control reported to the arbiter
    control: String,
    /// Paths to devices that can emit the target key
    device_paths: Vec<PathBuf>,
    /// Signal to stop the listener task
    stop_signal: Option<oneshot::Sender<()>>,
}

impl EvdevListener {
    /// Create a listener for the given key name on the given capture path
    pub fn new(
        key: &str,
        modifiers: &[String],
        source: SourceKind,
        control: &str,
    ) -> Result<Self, CaptureError> {
        let target_key = parse_key_name(key)?;

        let modifier_keys = modifiers
            .iter()
            .map(|k| parse_key_name(k))
            .collect::<Result<HashSet<_>, _>>()?;

        let device_paths = find_devices_with_key(target_key)?;

        if device_paths.is_empty() {
            return Err(CaptureError::NoKeyboard);
        }

        tracing::debug!(
            "{} path: {} device(s) can emit {:?}: {:?}",
            source,
            device_paths.len(),
            target_key,
            device_paths
        );

        Ok(Self {
            target_key,
            modifier_keys,
            source,
            control: control.to_string(),
            device_paths,
            stop_signal: None,
        })
    }
}

#[async_trait::async_trait]
impl super::CaptureListener for EvdevListener {
    async fn start(&mut self, tx: mpsc::Sender<SourceEvent>) -> Result<(), CaptureError> {
        let (stop_tx, stop_rx) = oneshot::channel();
        self.stop_signal = Some(stop_tx);

        let target_key = self.target_key;
        let modifier_keys = self.modifier_keys.clone();
        let source = self.source;
        let control = self.control.clone();
        let device_paths = self.device_paths.clone();

        tokio::task::spawn_blocking(move || {
            listener_loop(
                device_paths,
                target_key,
                modifier_keys,
                source,
                control,
                tx,
                stop_rx,
            );
        });

        Ok(())
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        if let Some(stop) = self.stop_signal.take() {
            let _ = stop.send(());
        }
        Ok(())
    }
}

/// Main listener loop running in a blocking task
fn listener_loop(
    device_paths: Vec<PathBuf>,
    target_key: Key,
    modifier_keys: HashSet<Key>,
    source: SourceKind,
    control: String,
    tx: mpsc::Sender<SourceEvent>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    // Open all candidate devices in non-blocking mode
    let mut devices: Vec<Device> = device_paths
        .iter()
        .filter_map(|path| match Device::open(path) {
            Ok(device) => {
                // Non-blocking so fetch_events never stalls the poll loop
                let fd = device.as_raw_fd();
                unsafe {
                    let flags = libc::fcntl(fd, libc::F_GETFL);
                    if flags != -1 {
                        libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
                    }
                }
                tracing::debug!("Opened device (non-blocking): {:?}", path);
                Some(device)
            }
            Err(e) => {
                tracing::warn!("Failed to open {:?}: {}", path, e);
                None
            }
        })
        .collect();

    if devices.is_empty() {
        tracing::error!("{} path: no input devices could be opened", source);
        return;
    }

    // Track currently held modifier keys
    let mut active_modifiers: HashSet<Key> = HashSet::new();

    // Track held state so key-repeat events never re-report a down
    let mut is_down = false;

    tracing::info!(
        "{} path listening for {:?} (modifiers: {:?})",
        source,
        target_key,
        modifier_keys
    );

    loop {
        // Check for stop signal (non-blocking)
        match stop_rx.try_recv() {
            Ok(_) | Err(oneshot::error::TryRecvError::Closed) => {
                tracing::debug!("{} path stopping", source);
                return;
            }
            Err(oneshot::error::TryRecvError::Empty) => {}
        }

        for device in &mut devices {
            // fetch_events returns immediately if no events (non-blocking)
            if let Ok(events) = device.fetch_events() {
                for event in events {
                    if let InputEventKind::Key(key) = event.kind() {
                        let value = event.value();

                        // Track modifier state
                        if modifier_keys.contains(&key) {
                            match value {
                                1 => {
                                    active_modifiers.insert(key);
                                }
                                0 => {
                                    active_modifiers.remove(&key);
                                }
                                _ => {}
                            }
                        }

                        if key != target_key {
                            continue;
                        }

                        let modifiers_satisfied =
                            modifier_keys.iter().all(|m| active_modifiers.contains(m));

                        match value {
                            1 if !is_down && modifiers_satisfied => {
                                is_down = true;
                                tracing::debug!("{} path: key down", source);
                                let event = SourceEvent {
                                    control: control.clone(),
                                    source,
                                    action: KeyAction::Down,
                                };
                                if tx.blocking_send(event).is_err() {
                                    return; // Channel closed
                                }
                            }
                            // Release is reported regardless of modifier state,
                            // otherwise dropping a modifier mid-hold wedges the key down
                            0 if is_down => {
                                is_down = false;
                                tracing::debug!("{} path: key up", source);
                                let event = SourceEvent {
                                    control: control.clone(),
                                    source,
                                    action: KeyAction::Up,
                                };
                                if tx.blocking_send(event).is_err() {
                                    return; // Channel closed
                                }
                            }
                            2 => {
                                // Key repeat - ignore
                            }
                            _ => {}
                        }
                    }
                }
            }
        }

        // Small sleep to avoid busy-waiting
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
}

/// Find all input devices that can emit the target key
pub(crate) fn find_devices_with_key(target_key: Key) -> Result<Vec<PathBuf>, CaptureError> {
    let mut matching = Vec::new();

    let input_dir = std::fs::read_dir("/dev/input")
        .map_err(|e| CaptureError::DeviceAccess(format!("/dev/input: {}", e)))?;

    for entry in input_dir {
        let entry = entry.map_err(|e| CaptureError::DeviceAccess(e.to_string()))?;
        let path = entry.path();

        // Only look at event* devices
        let is_event_device = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("event"))
            .unwrap_or(false);

        if !is_event_device {
            continue;
        }

        match Device::open(&path) {
            Ok(device) => {
                let has_key = device
                    .supported_keys()
                    .map(|keys| keys.contains(target_key))
                    .unwrap_or(false);

                if has_key {
                    tracing::debug!(
                        "Found device with {:?}: {:?} ({:?})",
                        target_key,
                        path,
                        device.name().unwrap_or("unknown")
                    );
                    matching.push(path);
                }
            }
            Err(e) => {
                // Permission denied is common for non-input-group users
                if e.kind() == std::io::ErrorKind::PermissionDenied {
                    return Err(CaptureError::DeviceAccess(path.display().to_string()));
                }
                // Other errors (device busy, etc.) - just skip
                tracing::trace!("Skipping {:?}: {}", path, e);
            }
        }
    }

    Ok(matching)
}

/// Parse a key name string to evdev Key
pub(crate) fn parse_key_name(name: &str) -> Result<Key, CaptureError> {
    // Normalize: uppercase and replace - or space with _
    let normalized: String = name
        .chars()
        .map(|c| match c {
            '-' | ' ' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect();

    // Add KEY_ prefix if not present
    let key_name = if normalized.starts_with("KEY_") {
        normalized
    } else {
        format!("KEY_{}", normalized)
    };

    let key = match key_name.as_str() {
        // Lock keys (good push-to-talk candidates)
        "KEY_SCROLLLOCK" => Key::KEY_SCROLLLOCK,
        "KEY_PAUSE" => Key::KEY_PAUSE,
        "KEY_CAPSLOCK" => Key::KEY_CAPSLOCK,
        "KEY_NUMLOCK" => Key::KEY_NUMLOCK,
        "KEY_INSERT" => Key::KEY_INSERT,

        // Modifier keys
        "KEY_LEFTALT" | "KEY_LALT" => Key::KEY_LEFTALT,
        "KEY_RIGHTALT" | "KEY_RALT" => Key::KEY_RIGHTALT,
        "KEY_LEFTCTRL" | "KEY_LCTRL" => Key::KEY_LEFTCTRL,
        "KEY_RIGHTCTRL" | "KEY_RCTRL" => Key::KEY_RIGHTCTRL,
        "KEY_LEFTSHIFT" | "KEY_LSHIFT" => Key::KEY_LEFTSHIFT,
        "KEY_RIGHTSHIFT" | "KEY_RSHIFT" => Key::KEY_RIGHTSHIFT,
        "KEY_LEFTMETA" | "KEY_LMETA" | "KEY_SUPER" => Key::KEY_LEFTMETA,

        // Function keys (F13-F24 are often unused and make good PTT keys)
        "KEY_F13" => Key::KEY_F13,
        "KEY_F14" => Key::KEY_F14,
        "KEY_F15" => Key::KEY_F15,
        "KEY_F16" => Key::KEY_F16,
        "KEY_F17" => Key::KEY_F17,
        "KEY_F18" => Key::KEY_F18,
        "KEY_F19" => Key::KEY_F19,
        "KEY_F20" => Key::KEY_F20,
        "KEY_F21" => Key::KEY_F21,
        "KEY_F22" => Key::KEY_F22,
        "KEY_F23" => Key::KEY_F23,
        "KEY_F24" => Key::KEY_F24,

        // Media-route keys (headset buttons commonly arrive as these)
        "KEY_MUTE" => Key::KEY_MUTE,
        "KEY_VOLUMEDOWN" => Key::KEY_VOLUMEDOWN,
        "KEY_VOLUMEUP" => Key::KEY_VOLUMEUP,
        "KEY_PLAYPAUSE" => Key::KEY_PLAYPAUSE,
        "KEY_PLAYCD" => Key::KEY_PLAYCD,
        "KEY_MICMUTE" => Key::KEY_MICMUTE,

        _ => {
            return Err(CaptureError::UnknownKey(format!(
                "{}. Try: SCROLLLOCK, PAUSE, F13-F24, PLAYPAUSE, or run 'evtest' to find key names",
                name
            )));
        }
    };

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_name() {
        assert_eq!(parse_key_name("SCROLLLOCK").unwrap(), Key::KEY_SCROLLLOCK);
        assert_eq!(parse_key_name("ScrollLock").unwrap(), Key::KEY_SCROLLLOCK);
        assert_eq!(
            parse_key_name("KEY_SCROLLLOCK").unwrap(),
            Key::KEY_SCROLLLOCK
        );
        assert_eq!(parse_key_name("F13").unwrap(), Key::KEY_F13);
        assert_eq!(parse_key_name("PLAYPAUSE").unwrap(), Key::KEY_PLAYPAUSE);
        assert_eq!(parse_key_name("LALT").unwrap(), Key::KEY_LEFTALT);
    }

    #[test]
    fn test_parse_key_name_error() {
        assert!(parse_key_name("INVALID_KEY_NAME").is_err());
    }
}
