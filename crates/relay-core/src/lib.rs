//! # relay-core
//!
//! Shared vocabulary for the device relay:
//!
//! - Device records and ids (`Device`, `DeviceId`, `DeviceValue`)
//! - Connection ids for live sockets
//! - The closed wire protocol spoken by devices and UI observers
//! - Frame decoding errors

#![deny(unsafe_code)]

pub mod device;
pub mod errors;
pub mod ids;
pub mod protocol;

pub use device::{Device, DeviceId, DeviceValue};
pub use errors::FrameError;
pub use ids::ConnectionId;
pub use protocol::{DevicePush, UiEvent, UiRequest, decode_device_hello, decode_ui_request};
