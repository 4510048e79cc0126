//! WebSocket sessions for devices and UIs.
//!
//! Each accepted socket is split in two: a reader that decodes inbound frames
//! and drives the [`Hub`], and a spawned writer that drains the connection's
//! outbound queue. A session ends when either half stops or the server shuts
//! down.

pub mod broadcast;
pub mod device_session;
pub mod ui_session;
pub mod writer;

use std::fmt;

use relay_core::FrameError;
use tokio_util::sync::CancellationToken;

use crate::hub::Hub;
use writer::{WriterExit, WriterSettings};

/// Everything a session needs from the server.
#[derive(Clone)]
pub struct SessionContext {
    /// Shared hub.
    pub hub: Hub,
    /// Outbound writer timing.
    pub writer: WriterSettings,
    /// Outbound queue depth per connection.
    pub queue_capacity: usize,
    /// Cancelled when the server shuts down.
    pub shutdown: CancellationToken,
}

/// Why a session stopped.
#[derive(Debug, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer closed the socket or the stream ended.
    Closed,
    /// Reading from the socket failed.
    ReadError(String),
    /// A frame could not be decoded and the protocol treats that as fatal.
    Protocol(FrameError),
    /// A binary frame arrived.
    UnsupportedFrame,
    /// The writer half stopped first.
    Writer(WriterExit),
    /// The server is shutting down.
    Shutdown,
}

impl SessionEnd {
    /// Normal close or server shutdown.
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Closed | Self::Shutdown)
    }
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("closed"),
            Self::ReadError(e) => write!(f, "read error: {e}"),
            Self::Protocol(e) => write!(f, "protocol error: {e}"),
            Self::UnsupportedFrame => f.write_str("unsupported frame type"),
            Self::Writer(exit) => write!(f, "writer stopped: {}", exit.as_str()),
            Self::Shutdown => f.write_str("server shutdown"),
        }
    }
}
