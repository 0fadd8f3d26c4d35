//! Network relay client
//!
//! The runtime cannot open TCP sockets from a page, so it multiplexes many
//! logical connections over one bidirectional framed-JSON channel to a
//! remote proxy that performs the actual TCP. This crate is the in-page
//! client: it owns the connection table and the per-id state machine and
//! speaks the wire protocol; the transport itself (a WebSocket on the main
//! thread) is behind the [`RelayChannel`] trait so the whole client runs
//! under native tests.
//!
//! # Wire protocol
//!
//! One JSON object per channel frame, with a 1-character type tag:
//!
//! | `t` | Direction | Meaning |
//! |-----|-----------|---------|
//! | `o` | client → server | open (host, port) under id |
//! | `O` | server → client | open succeeded for id |
//! | `w` | client → server | payload bytes to id |
//! | `d` | server → client | payload bytes from id |
//! | `c` | client → server | close id |
//! | `C` | server → client | id ended for any reason |
//! | `e` | server → client | id failed; also answers a pending open |
//!
//! Payload bytes travel base64-encoded in the `b64` field.

mod client;
mod conn;
mod frame;

pub use client::{ChannelState, RelayChannel, RelayClient, RelayConfig, RelayEvent};
pub use conn::{CloseHandler, Connection, DataHandler, ErrorHandler};
pub use frame::{Frame, FrameTag};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay channel is not connected")]
    ChannelDown,
    #[error("connection limit of {0} reached")]
    TooManyConnections(usize),
    #[error("no connection with id {0}")]
    UnknownConnection(u32),
    #[error("connection {0} is closed")]
    ConnectionClosed(u32),
    #[error("protocol error: {0}")]
    Protocol(String),
}
