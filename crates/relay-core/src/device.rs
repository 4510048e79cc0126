//! Device records as the hub sees them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric device identity, chosen by the device itself when it connects.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(i64);

impl DeviceId {
    /// Wrap a raw id.
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// The raw integer id.
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for DeviceId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Last known state of a connected device.
///
/// Also the shape of the identification frame a device sends on connect.
/// Missing `description`/`value` fields decode as empty/zero.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Device identity.
    pub id: DeviceId,
    /// Free-form label, informational only.
    #[serde(default)]
    pub description: String,
    /// Current value. Meaning is up to the device (PWM duty, on/off, ...).
    #[serde(default)]
    pub value: i64,
}

impl Device {
    /// Build a device record.
    pub fn new(id: impl Into<DeviceId>, description: impl Into<String>, value: i64) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            value,
        }
    }
}

/// A value addressed to a single device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceValue {
    /// Target device.
    pub id: DeviceId,
    /// New value.
    pub value: i64,
}
