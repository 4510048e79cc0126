//! The hub: device store + UI registry, and the routing between them.
//!
//! Every change UIs must observe is applied first and announced second, with
//! exactly one broadcast per accepted change. Announcements are queued while
//! the store still holds its write lock, so devices and UIs receive changes
//! in the order the store applied them.

use std::fmt;
use std::sync::Arc;

use metrics::{counter, gauge};
use relay_core::{ConnectionId, Device, DeviceId, DeviceValue, UiEvent};
use tracing::{debug, info, warn};

use crate::connection::{Connection, SendOutcome};
use crate::metrics::{DEVICE_PUSH_DROPS_TOTAL, DEVICES_ACTIVE, UIS_ACTIVE, VALUE_SETS_TOTAL};
use crate::store::{DeviceStore, RegisterOutcome, SetValueOutcome};
use crate::websocket::broadcast::UiRegistry;

/// Where a value-set request came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    /// A connected UI observer.
    Ui,
    /// The REST trigger endpoint.
    Rest,
}

impl Origin {
    /// Label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ui => "ui",
            Self::Rest => "rest",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared hub state. Cheap to clone.
#[derive(Clone, Default)]
pub struct Hub {
    devices: Arc<DeviceStore>,
    uis: Arc<UiRegistry>,
}

impl Hub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// The device store.
    pub fn devices(&self) -> &DeviceStore {
        &self.devices
    }

    /// The UI registry.
    pub fn uis(&self) -> &UiRegistry {
        &self.uis
    }

    /// Register a device that identified itself and announce it to UIs.
    ///
    /// A repeated identification on the same connection refreshes the record
    /// without another announcement.
    pub fn device_connected(&self, device: Device, connection: Arc<Connection>) -> RegisterOutcome {
        let conn_id = connection.id.clone();
        let id = device.id;
        let description = device.description.clone();
        let outcome = self.devices.register_then(device, connection, |outcome, stored| {
            if outcome.announces() {
                let _ = self.uis.broadcast(&UiEvent::Add(stored.clone()));
            }
        });
        gauge!(DEVICES_ACTIVE).set(self.devices.len() as f64);

        match &outcome {
            RegisterOutcome::Added => {
                info!(device_id = %id, %description, conn_id = %conn_id, "device connected");
            }
            RegisterOutcome::Replaced { previous } => {
                warn!(device_id = %id, conn_id = %conn_id, previous = %previous, "device id taken over by new connection");
            }
            RegisterOutcome::Refreshed => {
                debug!(device_id = %id, conn_id = %conn_id, "device re-identified");
            }
        }
        outcome
    }

    /// Drop a device's registration if `owner` still holds it.
    pub fn device_disconnected(&self, id: DeviceId, owner: &ConnectionId) -> bool {
        let removed = self.devices.release(id, owner);
        gauge!(DEVICES_ACTIVE).set(self.devices.len() as f64);
        if removed {
            info!(device_id = %id, conn_id = %owner, "device unregistered");
        } else {
            debug!(device_id = %id, conn_id = %owner, "device already superseded or gone");
        }
        removed
    }

    /// Apply a value to a device and, if applied, broadcast the update.
    pub fn apply_value(&self, id: DeviceId, value: i64, origin: Origin) -> SetValueOutcome {
        counter!(VALUE_SETS_TOTAL, "origin" => origin.as_str()).increment(1);
        let outcome = self.devices.set_value_then(id, value, |outcome| {
            if outcome.applied() {
                let _ = self.uis.broadcast(&UiEvent::Update(DeviceValue { id, value }));
            }
        });

        match outcome {
            SetValueOutcome::Delivered => {
                info!(device_id = %id, value, %origin, "device value set");
            }
            SetValueOutcome::Dropped(reason) => {
                counter!(DEVICE_PUSH_DROPS_TOTAL).increment(1);
                warn!(device_id = %id, value, %origin, reason = reason.as_str(), "device value applied but push dropped");
            }
            SetValueOutcome::NotConnected => {
                debug!(device_id = %id, value, %origin, "value set for unconnected device ignored");
            }
        }
        outcome
    }

    /// Register a UI and queue its `init` snapshot.
    ///
    /// The UI joins the registry and gets its snapshot under the store's read
    /// lock: every change is either in the snapshot or broadcast to it after.
    pub fn attach_ui(&self, connection: Arc<Connection>) -> UiMembership {
        let sent = self.devices.snapshot_then(|devices| {
            let count = devices.len();
            let sent = match UiEvent::Init(devices).encode() {
                Ok(json) => connection.send(Arc::new(json)),
                Err(e) => {
                    warn!(conn_id = %connection.id, error = %e, "failed to encode init frame");
                    SendOutcome::Closed
                }
            };
            let _ = self.uis.add(Arc::clone(&connection));
            (sent, count)
        });
        gauge!(UIS_ACTIVE).set(self.uis.len() as f64);
        match sent {
            (SendOutcome::Queued, devices) => {
                info!(conn_id = %connection.id, devices, "ui connected");
            }
            (outcome, _) => {
                warn!(conn_id = %connection.id, reason = outcome.as_str(), "failed to queue init frame");
            }
        }

        UiMembership {
            hub: self.clone(),
            id: connection.id.clone(),
        }
    }

    /// Remove a UI. Idempotent.
    pub fn detach_ui(&self, id: &ConnectionId) -> bool {
        let removed = self.uis.remove(id);
        gauge!(UIS_ACTIVE).set(self.uis.len() as f64);
        if removed {
            info!(conn_id = %id, "ui disconnected");
        }
        removed
    }
}

/// Keeps a device registered for as long as it lives.
///
/// Dropping it (normal close, protocol error, read error or unwinding panic)
/// releases the registration exactly once.
pub struct DeviceRegistration {
    hub: Hub,
    id: DeviceId,
    owner: ConnectionId,
}

impl DeviceRegistration {
    /// Take responsibility for releasing `id` on behalf of `owner`.
    pub fn new(hub: Hub, id: DeviceId, owner: ConnectionId) -> Self {
        Self { hub, id, owner }
    }

    /// The registered device id.
    pub fn device_id(&self) -> DeviceId {
        self.id
    }
}

impl Drop for DeviceRegistration {
    fn drop(&mut self) {
        let _ = self.hub.device_disconnected(self.id, &self.owner);
    }
}

/// Keeps a UI in the registry for as long as it lives.
pub struct UiMembership {
    hub: Hub,
    id: ConnectionId,
}

impl UiMembership {
    /// The UI's connection id.
    pub fn connection_id(&self) -> &ConnectionId {
        &self.id
    }
}

impl Drop for UiMembership {
    fn drop(&mut self) {
        let _ = self.hub.detach_ui(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    use super::*;

    type Rx = mpsc::Receiver<Arc<String>>;

    fn conn() -> (Arc<Connection>, Rx) {
        Connection::channel(None, 16)
    }

    fn next_json(rx: &mut Rx) -> serde_json::Value {
        let msg = rx.try_recv().expect("expected a queued frame");
        serde_json::from_str(&msg).unwrap()
    }

    /// Replay a UI's frames into the device values it would display.
    fn ui_view(rx: &mut Rx) -> BTreeMap<i64, i64> {
        let mut view = BTreeMap::new();
        while let Ok(frame) = rx.try_recv() {
            let v: serde_json::Value = serde_json::from_str(&frame).unwrap();
            let mut record = |d: &serde_json::Value| {
                let _ = view.insert(d["id"].as_i64().unwrap(), d["value"].as_i64().unwrap());
            };
            match v["id"].as_str().unwrap() {
                "init" => v["payload"].as_array().unwrap().iter().for_each(&mut record),
                "add" | "update" => record(&v["payload"]),
                other => panic!("unexpected frame {other}"),
            }
        }
        view
    }

    /// Value the device behind `rx` last heard about, starting from its hello.
    fn last_pushed(rx: &mut Rx, hello: i64) -> i64 {
        let mut last = hello;
        while let Ok(frame) = rx.try_recv() {
            let v: serde_json::Value = serde_json::from_str(&frame).unwrap();
            last = v["value"].as_i64().unwrap();
        }
        last
    }

    #[test]
    fn concurrent_changes_keep_devices_and_uis_in_step() {
        for _ in 0..100 {
            let hub = Hub::new();
            let (first, first_rx) = Connection::channel(None, 1024);
            let devices = Mutex::new(vec![(first.id.clone(), 0, first_rx)]);
            let _ = hub.device_connected(Device::new(1, "fan", 0), first);
            let uis = Mutex::new(Vec::new());

            std::thread::scope(|scope| {
                let (hub, devices, uis) = (&hub, &devices, &uis);
                for value in [10, 20] {
                    let _ = scope.spawn(move || {
                        for _ in 0..20 {
                            let _ = hub.apply_value(DeviceId::new(1), value, Origin::Ui);
                        }
                    });
                }
                let _ = scope.spawn(move || {
                    for hello in [30, 40] {
                        let (conn, rx) = Connection::channel(None, 1024);
                        devices.lock().push((conn.id.clone(), hello, rx));
                        let _ = hub.device_connected(Device::new(1, "fan", hello), conn);
                    }
                });
                let _ = scope.spawn(move || {
                    for _ in 0..3 {
                        let (conn, rx) = Connection::channel(None, 1024);
                        let membership = hub.attach_ui(conn);
                        uis.lock().push((membership, rx));
                    }
                });
            });

            let stored = hub.devices().get(DeviceId::new(1)).unwrap().value;
            assert_eq!(hub.devices().snapshot()[0].value, stored);
            let owner = hub.devices().owner(DeviceId::new(1)).unwrap();
            for (conn_id, hello, mut rx) in devices.into_inner() {
                if conn_id == owner {
                    assert_eq!(last_pushed(&mut rx, hello), stored);
                }
            }
            for (_membership, mut rx) in uis.into_inner() {
                assert_eq!(ui_view(&mut rx).get(&1), Some(&stored));
            }
        }
    }

    #[test]
    fn device_connect_announces_add() {
        let hub = Hub::new();
        let (ui, mut ui_rx) = conn();
        let _membership = hub.attach_ui(ui);
        let _ = next_json(&mut ui_rx); // init

        let (dev, _dev_rx) = conn();
        let outcome = hub.device_connected(Device::new(1, "fan", 0), dev);
        assert_eq!(outcome, RegisterOutcome::Added);
        assert_eq!(
            next_json(&mut ui_rx),
            serde_json::json!({"id": "add", "payload": {"id": 1, "description": "fan", "value": 0}})
        );
    }

    #[test]
    fn refresh_is_not_announced() {
        let hub = Hub::new();
        let (ui, mut ui_rx) = conn();
        let _membership = hub.attach_ui(ui);
        let (dev, _dev_rx) = conn();
        let _ = hub.device_connected(Device::new(1, "fan", 0), Arc::clone(&dev));
        let _ = next_json(&mut ui_rx);
        let _ = next_json(&mut ui_rx);

        let outcome = hub.device_connected(Device::new(1, "fan", 0), dev);
        assert_eq!(outcome, RegisterOutcome::Refreshed);
        assert!(ui_rx.try_recv().is_err());
    }

    #[test]
    fn reconnect_is_announced() {
        let hub = Hub::new();
        let (ui, mut ui_rx) = conn();
        let _membership = hub.attach_ui(ui);
        let (old, _rx1) = conn();
        let (new, _rx2) = conn();
        let _ = hub.device_connected(Device::new(1, "fan", 0), old);
        let outcome = hub.device_connected(Device::new(1, "fan (new)", 0), new);
        assert!(matches!(outcome, RegisterOutcome::Replaced { .. }));

        let _ = next_json(&mut ui_rx); // init
        let _ = next_json(&mut ui_rx); // first add
        assert_eq!(next_json(&mut ui_rx)["payload"]["description"], "fan (new)");
    }

    #[test]
    fn attach_ui_sends_current_snapshot() {
        let hub = Hub::new();
        let (dev, _dev_rx) = conn();
        let _ = hub.device_connected(Device::new(1, "fan", 0), dev);
        let _ = hub.apply_value(DeviceId::new(1), 80, Origin::Ui);

        let (ui, mut ui_rx) = conn();
        let membership = hub.attach_ui(ui);
        assert_eq!(
            next_json(&mut ui_rx),
            serde_json::json!({"id": "init", "payload": [{"id": 1, "description": "fan", "value": 80}]})
        );
        assert!(hub.uis().contains(membership.connection_id()));
    }

    #[tokio::test]
    async fn apply_value_pushes_then_broadcasts() {
        let hub = Hub::new();
        let (dev, mut dev_rx) = conn();
        let _ = hub.device_connected(Device::new(1, "fan", 0), dev);
        let (ui_a, mut rx_a) = conn();
        let (ui_b, mut rx_b) = conn();
        let _a = hub.attach_ui(ui_a);
        let _b = hub.attach_ui(ui_b);
        let _ = next_json(&mut rx_a);
        let _ = next_json(&mut rx_b);

        let outcome = hub.apply_value(DeviceId::new(1), 80, Origin::Ui);
        assert_eq!(outcome, SetValueOutcome::Delivered);

        let push: serde_json::Value = serde_json::from_str(&dev_rx.recv().await.unwrap()).unwrap();
        assert_eq!(push, serde_json::json!({"value": 80}));
        let expected = serde_json::json!({"id": "update", "payload": {"id": 1, "value": 80}});
        assert_eq!(next_json(&mut rx_a), expected);
        assert_eq!(next_json(&mut rx_b), expected);
        assert_eq!(hub.devices().get(DeviceId::new(1)).unwrap().value, 80);
    }

    #[test]
    fn apply_value_to_missing_device_is_silent() {
        let hub = Hub::new();
        let (ui, mut ui_rx) = conn();
        let _membership = hub.attach_ui(ui);
        let _ = next_json(&mut ui_rx);

        let outcome = hub.apply_value(DeviceId::new(9), 1, Origin::Rest);
        assert_eq!(outcome, SetValueOutcome::NotConnected);
        assert!(ui_rx.try_recv().is_err());
        assert!(hub.devices().is_empty());
    }

    #[test]
    fn registration_guard_releases_on_drop() {
        let hub = Hub::new();
        let (dev, _rx) = conn();
        let _ = hub.device_connected(Device::new(3, "lamp", 1), Arc::clone(&dev));
        let guard = DeviceRegistration::new(hub.clone(), DeviceId::new(3), dev.id.clone());
        assert_eq!(guard.device_id(), DeviceId::new(3));
        drop(guard);
        assert!(hub.devices().get(DeviceId::new(3)).is_none());
    }

    #[test]
    fn stale_guard_keeps_replacement() {
        let hub = Hub::new();
        let (old, _rx1) = conn();
        let (new, _rx2) = conn();
        let _ = hub.device_connected(Device::new(3, "lamp", 1), Arc::clone(&old));
        let stale = DeviceRegistration::new(hub.clone(), DeviceId::new(3), old.id.clone());
        let _ = hub.device_connected(Device::new(3, "lamp", 1), Arc::clone(&new));

        drop(stale);
        assert_eq!(hub.devices().owner(DeviceId::new(3)), Some(new.id.clone()));
    }

    #[test]
    fn registration_guard_releases_on_panic() {
        let hub = Hub::new();
        let (dev, _rx) = conn();
        let _ = hub.device_connected(Device::new(4, "pump", 0), Arc::clone(&dev));
        let guard_hub = hub.clone();
        let owner = dev.id.clone();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = DeviceRegistration::new(guard_hub, DeviceId::new(4), owner);
            panic!("decode blew up");
        }));
        assert!(result.is_err());
        assert!(hub.devices().is_empty());
    }

    #[test]
    fn membership_guard_detaches_on_drop() {
        let hub = Hub::new();
        let (ui, _rx) = conn();
        let membership = hub.attach_ui(ui);
        assert_eq!(hub.uis().len(), 1);
        drop(membership);
        assert!(hub.uis().is_empty());
        assert!(!hub.detach_ui(&ConnectionId::from_raw("nope")));
    }

    #[test]
    fn origin_labels() {
        assert_eq!(Origin::Ui.to_string(), "ui");
        assert_eq!(Origin::Rest.as_str(), "rest");
    }
}
