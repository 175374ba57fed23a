//! Capture health monitoring
//!
//! The OS can disable the capture mechanism out from under the daemon
//! (revoked input access, unplugged device, killed background service). Two
//! independently scheduled checks, a tight in-process timer and a coarser
//! OS-cadence timer, both ask the probe whether capture is still enabled
//! and publish transitions on a watch channel. Re-enabling is left to the
//! user; this component is purely advisory and never touches the session.

use crate::config::HealthConfig;
use std::time::Duration;
use tokio::sync::{oneshot, watch};

/// Boolean OS-level capture query, advisory only
pub trait CaptureProbe: Send + Sync {
    fn is_capture_enabled(&self) -> bool;
}

/// Published capture health state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureHealth {
    /// Whether the capture mechanism currently works
    pub enabled: bool,
    /// True while user remediation is required (cleared on recovery)
    pub remediation_required: bool,
}

impl CaptureHealth {
    fn healthy() -> Self {
        Self {
            enabled: true,
            remediation_required: false,
        }
    }
}

/// Periodic health monitor over a capture probe
pub struct CaptureHealthMonitor {
    probe: Box<dyn CaptureProbe>,
    fine_interval: Duration,
    coarse_interval: Duration,
    health_tx: watch::Sender<CaptureHealth>,
}

impl CaptureHealthMonitor {
    pub fn new(probe: Box<dyn CaptureProbe>, config: &HealthConfig) -> (Self, watch::Receiver<CaptureHealth>) {
        let (health_tx, health_rx) = watch::channel(CaptureHealth::healthy());
        (
            Self {
                probe,
                fine_interval: Duration::from_secs(config.fine_interval_secs),
                coarse_interval: Duration::from_secs(config.coarse_interval_secs),
                health_tx,
            },
            health_rx,
        )
    }

    /// Run both check loops until the stop signal fires
    pub async fn run(self, mut stop_rx: oneshot::Receiver<()>) {
        let mut fine = tokio::time::interval(self.fine_interval);
        let mut coarse = tokio::time::interval(self.coarse_interval);
        // First tick of an interval fires immediately; skip the double probe
        fine.tick().await;
        coarse.tick().await;

        tracing::debug!(
            "Capture health monitor running (fine: {:?}, coarse: {:?})",
            self.fine_interval,
            self.coarse_interval
        );

        loop {
            tokio::select! {
                _ = fine.tick() => self.check("fine"),
                _ = coarse.tick() => self.check("coarse"),
                _ = &mut stop_rx => {
                    tracing::debug!("Capture health monitor stopping");
                    return;
                }
            }
        }
    }

    fn check(&self, cadence: &str) {
        let enabled = self.probe.is_capture_enabled();
        let previous = *self.health_tx.borrow();

        if enabled == previous.enabled {
            return;
        }

        if !enabled {
            // No silent self-re-enable: surfacing this is the UI's job
            tracing::warn!(
                "Capture disabled at the OS level (detected by {} check); user remediation required",
                cadence
            );
            let _ = self.health_tx.send(CaptureHealth {
                enabled: false,
                remediation_required: true,
            });
        } else {
            tracing::info!("Capture re-enabled (detected by {} check)", cadence);
            let _ = self.health_tx.send(CaptureHealth::healthy());
        }
    }
}

/// Probe backed by the evdev device scan: capture counts as enabled while
/// at least one device carrying the target key can still be opened.
#[cfg(target_os = "linux")]
pub struct EvdevProbe {
    target_key: String,
}

#[cfg(target_os = "linux")]
impl EvdevProbe {
    pub fn new(target_key: &str) -> Self {
        Self {
            target_key: target_key.to_string(),
        }
    }
}

#[cfg(target_os = "linux")]
impl CaptureProbe for EvdevProbe {
    fn is_capture_enabled(&self) -> bool {
        // Re-scan each probe: the answer must reflect current device state
        let key = match super::evdev_listener::parse_key_name(&self.target_key) {
            Ok(key) => key,
            Err(_) => return false,
        };

        match super::evdev_listener::find_devices_with_key(key) {
            Ok(paths) => !paths.is_empty(),
            Err(_) => false,
        }
    }
}

/// Probe for platforms without a capture query; always reports enabled
pub struct AlwaysEnabledProbe;

impl CaptureProbe for AlwaysEnabledProbe {
    fn is_capture_enabled(&self) -> bool {
        true
    }
}
