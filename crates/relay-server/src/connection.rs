//! Live output channel of one WebSocket peer.
//!
//! Registries hold `Arc<Connection>` handles; writing to one only enqueues
//! onto a bounded queue drained by the connection's writer task, so no
//! socket I/O ever happens while a registry lock is held.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use relay_core::ConnectionId;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Outcome of enqueueing one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Frame accepted by the outbound queue.
    Queued,
    /// Queue full; the peer is not keeping up. Frame dropped.
    Full,
    /// Writer is gone; the peer disconnected. Frame dropped.
    Closed,
}

impl SendOutcome {
    /// Whether the frame was accepted.
    pub fn is_queued(self) -> bool {
        matches!(self, Self::Queued)
    }

    /// Short string for logs and HTTP responses.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Full => "full",
            Self::Closed => "closed",
        }
    }
}

/// A connected device or UI socket, as seen by the registries.
pub struct Connection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Remote address, when known.
    pub peer: Option<SocketAddr>,
    tx: mpsc::Sender<Arc<String>>,
    /// When this connection was established.
    pub connected_at: Instant,
    last_pong: Mutex<Instant>,
    dropped_messages: AtomicU64,
}

impl Connection {
    /// Wrap an existing sender.
    pub fn new(id: ConnectionId, peer: Option<SocketAddr>, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            peer,
            tx,
            connected_at: now,
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Create a connection with a fresh id and a bounded outbound queue.
    pub fn channel(
        peer: Option<SocketAddr>,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Arc::new(Self::new(ConnectionId::new(), peer, tx)), rx)
    }

    /// Enqueue a text frame without waiting.
    pub fn send(&self, message: Arc<String>) -> SendOutcome {
        match self.tx.try_send(message) {
            Ok(()) => SendOutcome::Queued,
            Err(err) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                match err {
                    mpsc::error::TrySendError::Full(_) => SendOutcome::Full,
                    mpsc::error::TrySendError::Closed(_) => SendOutcome::Closed,
                }
            }
        }
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record a Pong (or any other sign of life).
    pub fn mark_alive(&self) {
        *self.last_pong.lock() = Instant::now();
    }

    /// Time since the last Pong, or since connecting.
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("dropped_messages", &self.drop_count())
            .finish_non_exhaustive()
    }
}
