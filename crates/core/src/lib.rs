//! Runtime core — the process-wide object behind a hosted web view.
//!
//! The core owns the asynchronous I/O reactor and everything whose lifetime
//! is bound to it:
//!
//! - **Event loop host**: dedicated-thread or host-driven reactor with a
//!   cross-thread dispatch queue
//! - **Timers**: the fixed built-in reclamation timers plus the user-facing
//!   `set_timeout` / `set_interval` / `set_immediate` surface
//! - **Queued responses**: TTL'd payloads the render process fetches via
//!   `ipc://post?id=…`
//! - **Shared buffers**: strong references pinning bytes through in-flight
//!   async writes
//! - **Descriptor reaper**: closes stale, unretained filesystem descriptors
//! - **Conduit**: the loopback WebSocket channel for binary traffic
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │ webrun-bridge│  IPC routing, scheme handlers, navigation
//! └──────┬───────┘
//! ┌──────▼───────┐
//! │ webrun-core  │  This crate
//! │ ┌──────────┐ │
//! │ │ EventLoop│ │  reactor + dispatch queue
//! │ └──────────┘ │
//! │ ┌──────────┐ │
//! │ │ Timers   │ │  reclamation + user timers
//! │ └──────────┘ │
//! │ ┌──────────┐ │
//! │ │ Conduit  │ │  loopback WebSocket
//! │ └──────────┘ │
//! └──────────────┘
//! ```

pub mod conduit;
pub mod config;
mod core;
pub mod crypto;
pub mod cwd;
pub mod error;
pub mod event_loop;
pub mod fs;
pub mod headers;
pub mod javascript;
pub mod logging;
pub mod queued_response;
pub mod shared_buffer;
pub mod timers;

pub use conduit::{Conduit, EncodedMessage};
pub use config::{Config, Platform};
pub use self::core::{Core, CoreOptions};
pub use crypto::rand64;
pub use cwd::{cwd, set_cwd};
pub use error::{Error, Result};
pub use event_loop::{EventLoop, LoopState};
pub use headers::{Header, Headers};
pub use logging::init_logging;
pub use queued_response::{QueuedResponse, QueuedResponses};
pub use shared_buffer::SharedBufferRetainer;
pub use timers::{IntervalCancel, TimerId, Timers};
