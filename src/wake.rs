//! Wake-hold / keep-alive resource
//!
//! Acquired when a connect intent is issued and released only once the
//! session is torn down with no pending debounce deadline, so the hold is
//! never dropped right before a reuse-driven reconnect. The Debouncer owns
//! the hold; every teardown path routes through it.

/// Trait for platform keep-alive implementations
pub trait WakeHold: Send + Sync {
    /// Take the hold. Acquiring an already-held hold is a no-op.
    fn acquire(&self);

    /// Drop the hold. Releasing an unheld hold is a no-op.
    fn release(&self);
}

/// Logging-only hold for platforms without a keep-alive primitive
#[derive(Default)]
pub struct NoopWakeHold;

impl WakeHold for NoopWakeHold {
    fn acquire(&self) {
        tracing::debug!("wake hold acquired");
    }

    fn release(&self) {
        tracing::debug!("wake hold released");
    }
}
