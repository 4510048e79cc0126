//! UI observer registry and event fan-out.

use std::sync::Arc;

use dashmap::DashMap;
use metrics::counter;
use relay_core::{ConnectionId, UiEvent};
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::metrics::BROADCAST_DROPS_TOTAL;

/// Delivery tally for one broadcast.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// UIs registered when the broadcast ran.
    pub recipients: usize,
    /// Frames accepted by a UI's outbound queue.
    pub delivered: usize,
    /// Frames dropped (queue full or UI gone).
    pub dropped: usize,
}

/// Set of connected UI observers.
#[derive(Default)]
pub struct UiRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
}

impl UiRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a UI. Returns `false` if it was already present.
    pub fn add(&self, connection: Arc<Connection>) -> bool {
        self.connections
            .insert(connection.id.clone(), connection)
            .is_none()
    }

    /// Remove a UI. Returns `false` if it was not present.
    pub fn remove(&self, connection_id: &ConnectionId) -> bool {
        self.connections.remove(connection_id).is_some()
    }

    /// Whether a UI is registered.
    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.connections.contains_key(connection_id)
    }

    /// Serialize `event` once and enqueue it for every registered UI.
    ///
    /// A UI that cannot take the frame is counted and skipped; it stays
    /// registered until its own session tears down.
    pub fn broadcast(&self, event: &UiEvent) -> BroadcastReport {
        let json = match event.encode() {
            Ok(j) => Arc::new(j),
            Err(e) => {
                warn!(event = event.kind(), error = %e, "failed to serialize event");
                return BroadcastReport::default();
            }
        };

        let mut report = BroadcastReport::default();
        for entry in &self.connections {
            let conn = entry.value();
            report.recipients += 1;
            let outcome = conn.send(Arc::clone(&json));
            if outcome.is_queued() {
                report.delivered += 1;
            } else {
                report.dropped += 1;
                counter!(BROADCAST_DROPS_TOTAL).increment(1);
                warn!(
                    conn_id = %conn.id,
                    event = event.kind(),
                    reason = outcome.as_str(),
                    total_drops = conn.drop_count(),
                    "failed to send event to ui"
                );
            }
        }
        debug!(
            event = event.kind(),
            recipients = report.recipients,
            dropped = report.dropped,
            "broadcast event"
        );
        report
    }

    /// Number of connected UIs.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no UI is connected.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use relay_core::{Device, DeviceId, DeviceValue};
    use tokio::sync::mpsc;

    use super::*;

    fn ui(capacity: usize) -> (Arc<Connection>, mpsc::Receiver<Arc<String>>) {
        Connection::channel(None, capacity)
    }

    fn update(id: i64, value: i64) -> UiEvent {
        UiEvent::Update(DeviceValue {
            id: DeviceId::new(id),
            value,
        })
    }

    #[test]
    fn add_and_remove_are_idempotent() {
        let reg = UiRegistry::new();
        let (c, _rx) = ui(4);
        assert!(reg.add(Arc::clone(&c)));
        assert!(!reg.add(Arc::clone(&c)));
        assert_eq!(reg.len(), 1);
        assert!(reg.contains(&c.id));

        assert!(reg.remove(&c.id));
        assert!(!reg.remove(&c.id));
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn broadcast_reaches_every_ui() {
        let reg = UiRegistry::new();
        let (c1, mut rx1) = ui(4);
        let (c2, mut rx2) = ui(4);
        let _ = reg.add(c1);
        let _ = reg.add(c2);

        let report = reg.broadcast(&update(1, 80));
        assert_eq!(
            report,
            BroadcastReport {
                recipients: 2,
                delivered: 2,
                dropped: 0,
            }
        );

        for rx in [&mut rx1, &mut rx2] {
            let msg = rx.recv().await.unwrap();
            let parsed: serde_json::Value = serde_json::from_str(&msg).unwrap();
            assert_eq!(parsed["id"], "update");
            assert_eq!(parsed["payload"]["value"], 80);
        }
    }

    #[tokio::test]
    async fn closed_ui_does_not_block_others() {
        let reg = UiRegistry::new();
        let mut live = Vec::new();
        for _ in 0..3 {
            let (c, rx) = ui(4);
            let _ = reg.add(c);
            live.push(rx);
        }
        let (dead, dead_rx) = ui(4);
        drop(dead_rx);
        let _ = reg.add(Arc::clone(&dead));

        let report = reg.broadcast(&UiEvent::Add(Device::new(1, "fan", 0)));
        assert_eq!(report.recipients, 4);
        assert_eq!(report.delivered, 3);
        assert_eq!(report.dropped, 1);
        for rx in &mut live {
            assert!(rx.try_recv().is_ok());
        }
        // Removal is the owning session's job.
        assert!(reg.contains(&dead.id));
        assert_eq!(dead.drop_count(), 1);
    }

    #[test]
    fn full_queue_counts_as_dropped() {
        let reg = UiRegistry::new();
        let (c, _rx) = ui(1);
        let _ = reg.add(c);
        assert_eq!(reg.broadcast(&update(1, 1)).delivered, 1);
        let report = reg.broadcast(&update(1, 2));
        assert_eq!(report.delivered, 0);
        assert_eq!(report.dropped, 1);
    }

    #[test]
    fn broadcast_to_empty_registry() {
        let reg = UiRegistry::new();
        assert_eq!(reg.broadcast(&update(1, 1)), BroadcastReport::default());
    }

    #[tokio::test]
    async fn every_recipient_gets_identical_frame() {
        let reg = UiRegistry::new();
        let (c1, mut rx1) = ui(4);
        let (c2, mut rx2) = ui(4);
        let _ = reg.add(c1);
        let _ = reg.add(c2);
        let _ = reg.broadcast(&update(3, 9));

        let a = rx1.recv().await.unwrap();
        let b = rx2.recv().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
