//! Key event arbitration
//!
//! Collapses overlapping down/up reports from redundant capture paths into
//! one canonical press/release stream. Per logical control the arbiter keeps
//! the set of sources currently reporting it held: the set going empty →
//! non-empty emits exactly one press, non-empty → empty exactly one release.
//! A source repeating `down` or reporting `up` without a prior `down`
//! (capture path restarted mid-press) changes nothing.

use super::{KeyAction, KeyEvent, SourceEvent, SourceKind};
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;

/// Per-control arbitration state
#[derive(Debug, Default)]
struct KeyPressState {
    active_sources: HashSet<SourceKind>,
}

/// Arbiter over all logical controls
#[derive(Debug, Default)]
pub struct KeyEventArbiter {
    controls: HashMap<String, KeyPressState>,
}

impl KeyEventArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a raw down report; returns the canonical press if the control
    /// just became held.
    pub fn report_down(&mut self, control: &str, source: SourceKind) -> Option<KeyEvent> {
        let state = self.controls.entry(control.to_string()).or_default();
        let was_empty = state.active_sources.is_empty();
        state.active_sources.insert(source);

        if was_empty {
            tracing::debug!("{:?} pressed (first source: {})", control, source);
            Some(KeyEvent::Pressed {
                control: control.to_string(),
            })
        } else {
            tracing::trace!(
                "{:?} down from {} while already held by {:?}",
                control,
                source,
                state.active_sources
            );
            None
        }
    }

    /// Record a raw up report; returns the canonical release if the control
    /// just became fully released.
    pub fn report_up(&mut self, control: &str, source: SourceKind) -> Option<KeyEvent> {
        let state = self.controls.entry(control.to_string()).or_default();
        let was_active = state.active_sources.remove(&source);

        if !was_active {
            // Unmatched up (path restarted mid-press), nothing to release
            tracing::trace!("{:?} unmatched up from {}", control, source);
            return None;
        }

        if state.active_sources.is_empty() {
            tracing::debug!("{:?} released (last source: {})", control, source);
            Some(KeyEvent::Released {
                control: control.to_string(),
            })
        } else {
            tracing::trace!(
                "{:?} up from {} but still held by {:?}",
                control,
                source,
                state.active_sources
            );
            None
        }
    }

    fn apply(&mut self, event: &SourceEvent) -> Option<KeyEvent> {
        match event.action {
            KeyAction::Down => self.report_down(&event.control, event.source),
            KeyAction::Up => self.report_up(&event.control, event.source),
        }
    }
}

/// Arbiter pump: the single owner of all `KeyPressState`
///
/// Every capture path sends its raw reports into `source_rx`; canonical
/// events come out on `events_tx`. Runs until all source senders are gone.
pub async fn run_arbiter(
    mut source_rx: mpsc::Receiver<SourceEvent>,
    events_tx: mpsc::Sender<KeyEvent>,
) {
    let mut arbiter = KeyEventArbiter::new();

    while let Some(raw) = source_rx.recv().await {
        if let Some(event) = arbiter.apply(&raw) {
            if events_tx.send(event).await.is_err() {
                break; // Consumer gone
            }
        }
    }

    tracing::debug!("Arbiter pump stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_source_press_release() {
        let mut arbiter = KeyEventArbiter::new();

        assert_eq!(
            arbiter.report_down("ptt", SourceKind::Hardware),
            Some(KeyEvent::Pressed {
                control: "ptt".to_string()
            })
        );
        assert_eq!(
            arbiter.report_up("ptt", SourceKind::Hardware),
            Some(KeyEvent::Released {
                control: "ptt".to_string()
            })
        );
    }

    #[test]
    fn test_overlapping_sources_collapse() {
        let mut arbiter = KeyEventArbiter::new();

        // Two paths report the same physical hold
        assert!(arbiter.report_down("ptt", SourceKind::Hardware).is_some());
        assert!(arbiter.report_down("ptt", SourceKind::MediaRoute).is_none());

        // First path releasing does not release the control
        assert!(arbiter.report_up("ptt", SourceKind::Hardware).is_none());
        // Last path releasing does
        assert!(arbiter.report_up("ptt", SourceKind::MediaRoute).is_some());
    }

    #[test]
    fn test_duplicate_down_from_same_source() {
        let mut arbiter = KeyEventArbiter::new();

        assert!(arbiter.report_down("ptt", SourceKind::Hardware).is_some());
        // Same source repeating down is absorbed by the set
        assert!(arbiter.report_down("ptt", SourceKind::Hardware).is_none());
        assert!(arbiter.report_up("ptt", SourceKind::Hardware).is_some());
    }

    #[test]
    fn test_unmatched_up_is_noop() {
        let mut arbiter = KeyEventArbiter::new();

        // Capture path restarted mid-press: up arrives with no prior down
        assert!(arbiter.report_up("ptt", SourceKind::Accessibility).is_none());

        // A held control is unaffected by an unmatched up from another source
        assert!(arbiter.report_down("ptt", SourceKind::Hardware).is_some());
        assert!(arbiter.report_up("ptt", SourceKind::MediaRoute).is_none());
        assert!(arbiter.report_up("ptt", SourceKind::Hardware).is_some());
    }

    #[test]
    fn test_controls_are_independent() {
        let mut arbiter = KeyEventArbiter::new();

        assert!(arbiter.report_down("ptt", SourceKind::Hardware).is_some());
        assert!(arbiter.report_down("aux", SourceKind::Hardware).is_some());
        assert!(arbiter.report_up("aux", SourceKind::Hardware).is_some());
        assert!(arbiter.report_up("ptt", SourceKind::Hardware).is_some());
    }

    #[tokio::test]
    async fn test_pump_emits_canonical_stream() {
        let (source_tx, source_rx) = mpsc::channel(16);
        let (events_tx, mut events_rx) = mpsc::channel(16);

        let pump = tokio::spawn(run_arbiter(source_rx, events_tx));

        for (source, action) in [
            (SourceKind::Hardware, KeyAction::Down),
            (SourceKind::MediaRoute, KeyAction::Down),
            (SourceKind::MediaRoute, KeyAction::Up),
            (SourceKind::Hardware, KeyAction::Up),
        ] {
            source_tx
                .send(SourceEvent {
                    control: "ptt".to_string(),
                    source,
                    action,
                })
                .await
                .unwrap();
        }
        drop(source_tx);

        let mut events = Vec::new();
        while let Some(event) = events_rx.recv().await {
            events.push(event);
        }
        pump.await.unwrap();

        assert_eq!(
            events,
            vec![
                KeyEvent::Pressed {
                    control: "ptt".to_string()
                },
                KeyEvent::Released {
                    control: "ptt".to_string()
                },
            ]
        );
    }
}
