//! Voxlink: push-to-talk channel orchestration for Linux
//!
//! This library provides the core functionality for:
//! - Detecting PTT key presses via evdev (kernel-level, works on all compositors)
//! - Arbitrating overlapping capture paths into one canonical press/release stream
//! - Debouncing channel teardown so rapid transmissions reuse one connection
//! - Driving the audio transport session (join, transmit, token renewal, leave)
//! - Handling remote signaling (auto-join, invites, emergency calls)
//!
//! # Architecture
//!
//! ```text
//!   ┌──────────┐  ┌───────────────┐  ┌─────────────┐
//!   │  evdev   │  │ SIGUSR1/2     │  │ media-route │     capture paths
//!   │ hardware │  │ accessibility │  │   button    │
//!   └────┬─────┘  └──────┬────────┘  └──────┬──────┘
//!        │ down/up       │ down/up          │ down/up
//!        └───────────────┼──────────────────┘
//!                        ▼
//!                ┌──────────────┐
//!                │   Arbiter    │  collapses overlapping sources
//!                └──────┬───────┘
//!                       │ press / release
//!                       ▼
//!                ┌──────────────┐      press:   connect + transmit on
//!                │  Debouncer   │      release: transmit off, teardown
//!                └──────┬───────┘               deferred by delay D
//!                       │ connect / transmit / disconnect
//!                       ▼
//!   ┌───────────┐  ┌──────────────┐  ┌───────────────┐
//!   │ Signaling │─▶│   Session    │◀─│ Token provider│
//!   │ (push m.) │  │    actor     │  │ (single-flight│
//!   └───────────┘  └──────┬───────┘  │  cache, HTTP) │
//!                         │          └───────────────┘
//!                         ▼
//!                ┌──────────────┐
//!                │   Transport  │  external audio engine seam
//!                └──────────────┘
//! ```
//!
//! Every stateful component is an actor owning its state behind an mpsc
//! command channel; there is no shared mutable state between them.

pub mod capture;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod debounce;
pub mod error;
pub mod identity;
pub mod session;
pub mod signaling;
pub mod state;
pub mod store;
pub mod token;
pub mod transport;
pub mod wake;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use daemon::Daemon;
pub use error::{Result, VoxlinkError};
pub use session::SessionHandle;
pub use state::{SessionSnapshot, SessionState};
