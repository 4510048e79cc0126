//! Outbound half of a session: queue → socket, plus keepalive pings.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::connection::Connection;

/// Timing knobs for [`run_writer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriterSettings {
    /// Bound on any single socket write.
    pub write_timeout: Duration,
    /// Interval between Ping frames.
    pub ping_interval: Duration,
    /// Give up on a peer silent for longer than this.
    pub pong_timeout: Duration,
}

impl From<&ServerConfig> for WriterSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            write_timeout: config.write_timeout(),
            ping_interval: config.ping_interval(),
            pong_timeout: config.pong_timeout(),
        }
    }
}

/// Why the writer stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriterExit {
    /// Every sender for the queue was dropped.
    QueueClosed,
    /// The socket rejected a write.
    SinkClosed,
    /// A write did not complete within the write timeout.
    WriteTimedOut,
    /// The peer stopped answering pings.
    PongTimedOut,
    /// The writer task panicked or was cancelled.
    Panicked,
}

impl WriterExit {
    /// Short label for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::QueueClosed => "queue_closed",
            Self::SinkClosed => "sink_closed",
            Self::WriteTimedOut => "write_timed_out",
            Self::PongTimedOut => "pong_timed_out",
            Self::Panicked => "panicked",
        }
    }
}

/// Forward queued frames to `sink` until something gives out.
///
/// Every write is bounded by `write_timeout`, so a stalled peer stops only
/// its own writer. Producers never wait on it: they `try_send` into the queue.
pub async fn run_writer<S>(
    mut sink: S,
    mut rx: mpsc::Receiver<Arc<String>>,
    connection: Arc<Connection>,
    settings: WriterSettings,
) -> WriterExit
where
    S: Sink<Message> + Unpin,
{
    let mut ping_interval = tokio::time::interval(settings.ping_interval);
    // First tick fires immediately
    let _ = ping_interval.tick().await;

    loop {
        let frame = tokio::select! {
            msg = rx.recv() => match msg {
                Some(text) => Message::Text(String::clone(&text).into()),
                None => {
                    let _ = timeout(settings.write_timeout, sink.close()).await;
                    return WriterExit::QueueClosed;
                }
            },
            _ = ping_interval.tick() => {
                if connection.last_pong_elapsed() > settings.pong_timeout {
                    warn!(
                        conn_id = %connection.id,
                        silent_for = ?connection.last_pong_elapsed(),
                        "peer unresponsive, disconnecting"
                    );
                    return WriterExit::PongTimedOut;
                }
                Message::Ping(Vec::new().into())
            }
        };

        match timeout(settings.write_timeout, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                debug!(conn_id = %connection.id, "socket closed while writing");
                return WriterExit::SinkClosed;
            }
            Err(_) => {
                warn!(
                    conn_id = %connection.id,
                    timeout = ?settings.write_timeout,
                    "socket write timed out"
                );
                return WriterExit::WriteTimedOut;
            }
        }
    }
}
