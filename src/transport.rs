//! Audio transport engine seam
//!
//! The real-time audio engine (capture, encoding, media transport) is an
//! external collaborator. The session actor is the only caller of these
//! primitives; no other component touches the transport handle.

use crate::error::TransportError;

/// Events pushed by the transport engine, forwarded into the session actor
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The engine-side token is about to expire; renew without leaving
    TokenWillExpire,
    /// The engine lost the session unrecoverably
    ConnectionLost(TransportError),
}

/// Trait for audio transport engine implementations
///
/// `join` is not interruptible mid-flight; shutdown waits for it to settle
/// and then issues `leave`.
#[async_trait::async_trait]
pub trait AudioTransport: Send + Sync {
    /// Join a channel with the given identity and token
    async fn join(&self, channel: &str, uid: u32, token: &str) -> Result<(), TransportError>;

    /// Leave the current channel
    async fn leave(&self) -> Result<(), TransportError>;

    /// Enable or disable audio transmission on the joined channel
    async fn set_transmit(&self, enabled: bool) -> Result<(), TransportError>;

    /// Apply a renewed token to the live session
    async fn renew_token(&self, token: &str) -> Result<(), TransportError>;
}

/// No-op transport for engine-less runs
///
/// Lets the daemon exercise the full orchestration pipeline (key capture,
/// debounce, signaling, token fetch) when no audio engine is linked in.
pub struct NullTransport;

#[async_trait::async_trait]
impl AudioTransport for NullTransport {
    async fn join(&self, channel: &str, uid: u32, _token: &str) -> Result<(), TransportError> {
        tracing::info!("null transport: join channel {:?} as uid {}", channel, uid);
        Ok(())
    }

    async fn leave(&self) -> Result<(), TransportError> {
        tracing::info!("null transport: leave");
        Ok(())
    }

    async fn set_transmit(&self, enabled: bool) -> Result<(), TransportError> {
        tracing::info!("null transport: transmit {}", if enabled { "on" } else { "off" });
        Ok(())
    }

    async fn renew_token(&self, _token: &str) -> Result<(), TransportError> {
        tracing::info!("null transport: token renewed");
        Ok(())
    }
}
