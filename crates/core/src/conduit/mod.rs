//! The Conduit: a loopback WebSocket endpoint for binary message exchange
//! with the render process.
//!
//! Long-lived binary traffic (streams, capability module data) bypasses the
//! script-evaluation path entirely and flows over this channel instead. The
//! server lives on the reactor: the listener, every client socket, and every
//! write are reactor tasks.

pub mod codec;
pub mod frame;
mod server;

pub use codec::{EncodedMessage, decode, encode};
pub use server::{Client, CloseCallback, Conduit, ReceiveCallback, StartCallback, WriteCallback};
