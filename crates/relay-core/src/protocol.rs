//! Wire protocol between the hub, devices and UI observers.
//!
//! Every frame is a JSON text message.
//!
//! | Direction   | Shape |
//! |-------------|-------|
//! | device → hub | `{"id": n, "description": s, "value": n}` |
//! | hub → device | `{"value": n}` |
//! | UI → hub     | `{"id": "value", "payload": {"id": n, "value": n}}` |
//! | hub → UI     | `{"id": "init" \| "add" \| "update", "payload": ...}` |

use serde::{Deserialize, Serialize};

use crate::device::{Device, DeviceValue};
use crate::errors::FrameError;

/// Value push sent from the hub to a single device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePush {
    /// Value the device should apply.
    pub value: i64,
}

impl DevicePush {
    /// Encode as a text frame.
    pub fn encode(&self) -> String {
        serde_json::json!({ "value": self.value }).to_string()
    }
}

/// Requests a UI observer may send.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "id", content = "payload")]
pub enum UiRequest {
    /// Change the value of one device.
    #[serde(rename = "value")]
    SetValue(DeviceValue),
}

/// Events pushed to every UI observer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "id", content = "payload", rename_all = "lowercase")]
pub enum UiEvent {
    /// Full device list, sent once when a UI connects.
    Init(Vec<Device>),
    /// A device connected (or reconnected on a new socket).
    Add(Device),
    /// A device value was applied.
    Update(DeviceValue),
}

impl UiEvent {
    /// Wire tag of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init(_) => "init",
            Self::Add(_) => "add",
            Self::Update(_) => "update",
        }
    }

    /// Serialize to a text frame.
    pub fn encode(&self) -> Result<String, FrameError> {
        serde_json::to_string(self).map_err(|e| FrameError::Encode(e.to_string()))
    }
}

#[derive(Deserialize)]
struct TagProbe {
    id: String,
}

/// Decode a UI request frame.
///
/// A frame that is a well-formed envelope but carries an unrecognised tag is
/// reported as [`FrameError::UnknownTag`]; everything else that fails is
/// [`FrameError::Malformed`].
pub fn decode_ui_request(text: &str) -> Result<UiRequest, FrameError> {
    serde_json::from_str(text).map_err(|err| match serde_json::from_str::<TagProbe>(text) {
        Ok(probe) if !is_known_tag(&probe.id) => FrameError::UnknownTag(probe.id),
        _ => FrameError::Malformed(err.to_string()),
    })
}

fn is_known_tag(tag: &str) -> bool {
    matches!(tag, "value")
}

/// Decode a device identification frame.
pub fn decode_device_hello(text: &str) -> Result<Device, FrameError> {
    serde_json::from_str(text).map_err(|e| FrameError::Malformed(e.to_string()))
}
