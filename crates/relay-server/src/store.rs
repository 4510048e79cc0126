//! Authoritative device state: id → (record, output channel).
//!
//! Every operation takes the lock once and does in-memory work only. Frames
//! are queued with a non-blocking `try_send` while the lock is held, so every
//! recipient sees changes in the order the store applied them.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use relay_core::{ConnectionId, Device, DeviceId, DevicePush};

use crate::connection::{Connection, SendOutcome};

struct DeviceEntry {
    device: Device,
    connection: Arc<Connection>,
}

/// Result of [`DeviceStore::register`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// First registration for this id.
    Added,
    /// Another connection held this id and was superseded (last connect wins).
    Replaced {
        /// Connection that previously owned the id.
        previous: ConnectionId,
    },
    /// The owning connection identified itself again.
    Refreshed,
}

impl RegisterOutcome {
    /// Whether UIs should hear about this registration.
    pub fn announces(&self) -> bool {
        !matches!(self, Self::Refreshed)
    }
}

/// Result of [`DeviceStore::set_value`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetValueOutcome {
    /// Value applied and the push frame queued for the device.
    Delivered,
    /// Value applied, but the push frame could not be queued.
    Dropped(SendOutcome),
    /// No such device is connected. Nothing changed.
    NotConnected,
}

impl SetValueOutcome {
    /// Whether the in-memory record was updated.
    pub fn applied(self) -> bool {
        !matches!(self, Self::NotConnected)
    }

    /// Short string for logs and HTTP responses.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Dropped(_) => "dropped",
            Self::NotConnected => "not_connected",
        }
    }
}

/// Registry of connected devices.
#[derive(Default)]
pub struct DeviceStore {
    entries: RwLock<HashMap<DeviceId, DeviceEntry>>,
}

impl DeviceStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `device.id`.
    pub fn register(&self, device: Device, connection: Arc<Connection>) -> RegisterOutcome {
        self.register_then(device, connection, |_, _| ())
    }

    /// Like [`register`](Self::register), then run `f` with the outcome and
    /// the stored record before the write lock is released.
    ///
    /// `f` must not call back into the store.
    pub fn register_then(
        &self,
        device: Device,
        connection: Arc<Connection>,
        f: impl FnOnce(&RegisterOutcome, &Device),
    ) -> RegisterOutcome {
        let owner = connection.id.clone();
        let id = device.id;
        let mut entries = self.entries.write();
        let outcome = match entries.insert(id, DeviceEntry { device, connection }) {
            None => RegisterOutcome::Added,
            Some(prev) if prev.connection.id == owner => RegisterOutcome::Refreshed,
            Some(prev) => RegisterOutcome::Replaced {
                previous: prev.connection.id.clone(),
            },
        };
        if let Some(entry) = entries.get(&id) {
            f(&outcome, &entry.device);
        }
        outcome
    }

    /// Remove the entry for `id`, whoever owns it. Idempotent.
    pub fn unregister(&self, id: DeviceId) -> bool {
        self.entries.write().remove(&id).is_some()
    }

    /// Remove the entry for `id` only while `owner` still holds it.
    ///
    /// A connection superseded by a newer one for the same id must not evict
    /// its replacement when it closes.
    pub fn release(&self, id: DeviceId, owner: &ConnectionId) -> bool {
        let mut entries = self.entries.write();
        let owned = entries.get(&id).is_some_and(|e| e.connection.id == *owner);
        owned && entries.remove(&id).is_some()
    }

    /// Apply `value` to a connected device and push it down its channel.
    ///
    /// Unknown ids are a silent no-op. A failed push is reported, not retried.
    pub fn set_value(&self, id: DeviceId, value: i64) -> SetValueOutcome {
        self.set_value_then(id, value, |_| ())
    }

    /// Like [`set_value`](Self::set_value), then run `f` with the outcome
    /// before the write lock is released.
    ///
    /// Anything `f` enqueues is ordered exactly like the store's changes.
    /// `f` must not call back into the store.
    pub fn set_value_then(
        &self,
        id: DeviceId,
        value: i64,
        f: impl FnOnce(SetValueOutcome),
    ) -> SetValueOutcome {
        let mut entries = self.entries.write();
        let outcome = match entries.get_mut(&id) {
            None => SetValueOutcome::NotConnected,
            Some(entry) => {
                entry.device.value = value;
                match entry.connection.send(Arc::new(DevicePush { value }.encode())) {
                    SendOutcome::Queued => SetValueOutcome::Delivered,
                    other => SetValueOutcome::Dropped(other),
                }
            }
        };
        f(outcome);
        outcome
    }

    /// Copy of every registered device, ordered by id. Channels are not exposed.
    pub fn snapshot(&self) -> Vec<Device> {
        self.snapshot_then(|devices| devices)
    }

    /// Take a snapshot and hand it to `f` while still holding the read lock.
    ///
    /// No value can be applied until `f` returns, so anything `f` enqueues is
    /// ordered before the broadcasts of later changes. `f` must not call back
    /// into the store.
    pub fn snapshot_then<R>(&self, f: impl FnOnce(Vec<Device>) -> R) -> R {
        let entries = self.entries.read();
        let mut devices: Vec<Device> = entries.values().map(|e| e.device.clone()).collect();
        devices.sort_by_key(|d| d.id);
        f(devices)
    }

    /// Current record for one device.
    pub fn get(&self, id: DeviceId) -> Option<Device> {
        self.entries.read().get(&id).map(|e| e.device.clone())
    }

    /// Connection currently associated with `id`.
    pub fn owner(&self, id: DeviceId) -> Option<ConnectionId> {
        self.entries.read().get(&id).map(|e| e.connection.id.clone())
    }

    /// Number of connected devices.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no device is connected.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
